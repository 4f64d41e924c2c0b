use super::{GroupKind, GroupVersionKind, GroupVersionResource};
use crate::Result;
use ohno::{IntoAppError, app_err};
use serde::{Deserialize, Serialize};

/// Discovery snapshot used when no cluster is available, embedded from `discovery.json`
pub const BUNDLED_DISCOVERY_JSON: &str = include_str!("../../discovery.json");

/// The resources served by one API group, as reported by discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiGroupResources {
    /// Group name, empty for the core group
    #[serde(default)]
    pub name: String,
    pub preferred_version: String,
    pub versions: Vec<ApiVersionResources>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiVersionResources {
    pub version: String,
    pub resources: Vec<ApiResource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResource {
    /// Plural resource name, `pods/status` for subresources
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub namespaced: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Namespaced,
    Cluster,
}

/// The result of mapping a kind to the collection that serves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceMapping {
    pub resource: GroupVersionResource,
    pub group_version_kind: GroupVersionKind,
    pub scope: Scope,
}

/// Maps kinds to resources using a discovery document
#[derive(Debug, Clone)]
pub struct DiscoveryRestMapper {
    groups: Vec<ApiGroupResources>,
}

impl DiscoveryRestMapper {
    #[must_use]
    pub const fn new(groups: Vec<ApiGroupResources>) -> Self {
        Self { groups }
    }

    /// Build a mapper from the discovery snapshot shipped with the crate
    ///
    /// # Errors
    ///
    /// Returns an error if the embedded snapshot cannot be parsed
    pub fn bundled() -> Result<Self> {
        let groups: Vec<ApiGroupResources> =
            serde_json::from_str(BUNDLED_DISCOVERY_JSON).into_app_err("parsing the bundled discovery snapshot")?;
        Ok(Self::new(groups))
    }

    #[must_use]
    pub fn into_groups(self) -> Vec<ApiGroupResources> {
        self.groups
    }

    /// Resolve a kind to its resource
    ///
    /// An empty `version` selects the group's preferred version first and then
    /// any other served version.
    ///
    /// # Errors
    ///
    /// Returns an error if no served version of the group knows the kind
    pub fn rest_mapping(&self, group_kind: &GroupKind, version: &str) -> Result<ResourceMapping> {
        for group in self.groups.iter().filter(|g| g.name == group_kind.group) {
            let mut versions: Vec<&ApiVersionResources> = group
                .versions
                .iter()
                .filter(|v| version.is_empty() || v.version == version)
                .collect();
            versions.sort_by_key(|v| v.version != group.preferred_version);

            for served in versions {
                let found = served
                    .resources
                    .iter()
                    .find(|r| r.kind == group_kind.kind && !r.name.contains('/'));

                if let Some(resource) = found {
                    return Ok(ResourceMapping {
                        resource: GroupVersionResource::new(&group.name, &served.version, &resource.name),
                        group_version_kind: GroupVersionKind::new(&group.name, &served.version, &resource.kind),
                        scope: if resource.namespaced { Scope::Namespaced } else { Scope::Cluster },
                    });
                }
            }
        }

        let group_version = if group_kind.group.is_empty() {
            version.to_string()
        } else {
            format!("{}/{version}", group_kind.group)
        };
        Err(app_err!("no matches for kind \"{}\" in version \"{group_version}\"", group_kind.kind))
    }
}
