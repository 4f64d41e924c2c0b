//! Access to a cluster's resources and discovery document
//!
//! The evaluation pipeline never talks to a cluster directly; it goes through
//! [`ClusterClient`]. Network transport is out of scope, so the crate only
//! ships [`InMemoryCluster`], which serves resources loaded from files and is
//! what tests and offline runs with a fixture cluster use.

use crate::Result;
use crate::resource::{ApiGroupResources, DiscoveryRestMapper, GroupVersionResource, Resource};
use core::fmt::Debug;
use std::collections::BTreeMap;

/// Read access to a cluster
pub trait ClusterClient: Debug + Send + Sync {
    /// Fetch one resource; `namespace` is empty for cluster-scoped resources
    fn get_resource(&self, gvr: &GroupVersionResource, namespace: &str, name: &str) -> Result<Option<Resource>>;

    /// List the resources of a collection, across all namespaces when `namespace` is empty
    fn list_resources(&self, gvr: &GroupVersionResource, namespace: &str) -> Result<Vec<Resource>>;

    /// The cluster's discovery document
    fn discovery(&self) -> Result<Vec<ApiGroupResources>>;
}

type ResourceKey = (GroupVersionResource, String, String);

/// A cluster held in memory
///
/// Resources are indexed by collection, namespace and name. Discovery defaults
/// to the bundled snapshot.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCluster {
    resources: BTreeMap<ResourceKey, Resource>,
    discovery: Option<Vec<ApiGroupResources>>,
}

impl InMemoryCluster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the discovery document served by this cluster
    #[must_use]
    pub fn with_discovery(mut self, groups: Vec<ApiGroupResources>) -> Self {
        self.discovery = Some(groups);
        self
    }

    /// Store a resource, resolving its collection through discovery
    pub fn insert(&mut self, resource: Resource) -> Result<()> {
        let gvk = resource.group_version_kind();
        let mapper = DiscoveryRestMapper::new(self.discovery()?);
        let mapping = mapper.rest_mapping(&gvk.group_kind(), &gvk.version)?;
        self.insert_at(mapping.resource, resource);
        Ok(())
    }

    /// Store a resource under an explicit collection
    pub fn insert_at(&mut self, gvr: GroupVersionResource, resource: Resource) {
        let key = (gvr, resource.namespace().to_string(), resource.name().to_string());
        let _ = self.resources.insert(key, resource);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl ClusterClient for InMemoryCluster {
    fn get_resource(&self, gvr: &GroupVersionResource, namespace: &str, name: &str) -> Result<Option<Resource>> {
        Ok(self
            .resources
            .get(&(gvr.clone(), namespace.to_string(), name.to_string()))
            .cloned())
    }

    fn list_resources(&self, gvr: &GroupVersionResource, namespace: &str) -> Result<Vec<Resource>> {
        Ok(self
            .resources
            .iter()
            .filter(|((g, ns, _), _)| g == gvr && (namespace.is_empty() || ns == namespace))
            .map(|(_, resource)| resource.clone())
            .collect())
    }

    fn discovery(&self) -> Result<Vec<ApiGroupResources>> {
        match &self.discovery {
            Some(groups) => Ok(groups.clone()),
            None => Ok(DiscoveryRestMapper::bundled()?.into_groups()),
        }
    }
}
