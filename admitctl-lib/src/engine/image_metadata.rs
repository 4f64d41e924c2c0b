use crate::Result;
use crate::patch::{PatchOperation, add_operation};
use ohno::IntoAppError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Annotation recording which images were verified
pub const VERIFY_IMAGES_ANNOTATION: &str = "admitctl.io/verify-images";

/// The verification outcome recorded for one image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ImageVerificationStatus {
    Pass,
    Fail,
    Skip,
}

/// Verified-image results accumulated while verifying a resource
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageVerificationMetadata {
    images: BTreeMap<String, ImageVerificationStatus>,
}

impl ImageVerificationMetadata {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, image: impl Into<String>, status: ImageVerificationStatus) {
        let _ = self.images.insert(image.into(), status);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    #[must_use]
    pub fn get(&self, image: &str) -> Option<ImageVerificationStatus> {
        self.images.get(image).copied()
    }

    /// Patches recording the metadata as the verify-images annotation
    ///
    /// When the resource carries no annotations yet, the annotations object is
    /// added first.
    pub fn patches(&self, has_annotations: bool) -> Result<Vec<PatchOperation>> {
        let encoded = serde_json::to_string(&self.images).into_app_err("encoding verified image metadata")?;

        let mut patches = Vec::with_capacity(2);
        if !has_annotations {
            patches.push(add_operation("/metadata/annotations", Value::Object(Map::new()))?);
        }
        patches.push(add_operation(
            &format!("/metadata/annotations/{}", VERIFY_IMAGES_ANNOTATION.replace('~', "~0").replace('/', "~1")),
            Value::String(encoded),
        )?);
        Ok(patches)
    }
}
