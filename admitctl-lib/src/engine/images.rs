use crate::resource::Resource;
use serde_json::Value;

/// Where workloads keep their container lists
const CONTAINER_LISTS: &[&str] = &[
    "/spec/containers",
    "/spec/initContainers",
    "/spec/ephemeralContainers",
    "/spec/template/spec/containers",
    "/spec/template/spec/initContainers",
    "/spec/jobTemplate/spec/template/spec/containers",
    "/spec/jobTemplate/spec/template/spec/initContainers",
];

/// Every container image a resource references, in document order without duplicates
#[must_use]
pub fn container_images(resource: &Resource) -> Vec<String> {
    let mut images: Vec<String> = Vec::new();
    for list in CONTAINER_LISTS {
        let Some(Value::Array(containers)) = resource.pointer(list) else {
            continue;
        };
        for image in containers.iter().filter_map(|c| c.get("image")).filter_map(Value::as_str) {
            if !images.iter().any(|known| known == image) {
                images.push(image.to_string());
            }
        }
    }
    images
}

#[must_use]
pub fn is_digest_pinned(image: &str) -> bool {
    image.contains("@sha256:")
}
