use crate::Result;
use crate::cluster::{ClusterClient, InMemoryCluster};
use crate::resource::{DiscoveryRestMapper, GroupKind, GroupVersionResource, Resource, ResourceMapping};
use core::fmt::Debug;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

const LOG_TARGET: &str = "  provider";

/// Kind→Resource mapping and resource lookups available to CEL policies
pub trait CelContextProvider: Debug + Send + Sync {
    fn resolve(&self, group_kind: &GroupKind, version: &str) -> Result<ResourceMapping>;

    fn get_resource(&self, gvr: &GroupVersionResource, namespace: &str, name: &str) -> Result<Option<Resource>>;

    fn list_resources(&self, gvr: &GroupVersionResource, namespace: &str) -> Result<Vec<Resource>>;
}

#[derive(Debug, Clone)]
enum CachedLookup {
    Get(Option<Resource>),
    List(Vec<Resource>),
}

/// Memoizes cluster lookups for the duration of one run
#[derive(Debug, Default)]
pub struct GlobalContextStore {
    entries: Mutex<BTreeMap<String, CachedLookup>>,
}

impl GlobalContextStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, key: &str) -> Option<CachedLookup> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).get(key).cloned()
    }

    fn put(&self, key: String, lookup: CachedLookup) {
        let _ = self.entries.lock().unwrap_or_else(PoisonError::into_inner).insert(key, lookup);
    }
}

/// Serves lookups from a cluster, using its discovery document for mapping
#[derive(Debug)]
pub struct LiveContextProvider {
    client: Arc<dyn ClusterClient>,
    mapper: DiscoveryRestMapper,
    store: GlobalContextStore,
}

impl LiveContextProvider {
    pub fn new(client: Arc<dyn ClusterClient>, store: GlobalContextStore) -> Result<Self> {
        let mapper = DiscoveryRestMapper::new(client.discovery()?);
        Ok(Self { client, mapper, store })
    }

    #[must_use]
    pub const fn store(&self) -> &GlobalContextStore {
        &self.store
    }
}

impl CelContextProvider for LiveContextProvider {
    fn resolve(&self, group_kind: &GroupKind, version: &str) -> Result<ResourceMapping> {
        self.mapper.rest_mapping(group_kind, version)
    }

    fn get_resource(&self, gvr: &GroupVersionResource, namespace: &str, name: &str) -> Result<Option<Resource>> {
        let key = format!("get {gvr} {namespace}/{name}");
        if let Some(CachedLookup::Get(found)) = self.store.get(&key) {
            return Ok(found);
        }

        log::debug!(target: LOG_TARGET, "Fetching '{namespace}/{name}' from {gvr}");
        let found = self.client.get_resource(gvr, namespace, name)?;
        self.store.put(key, CachedLookup::Get(found.clone()));
        Ok(found)
    }

    fn list_resources(&self, gvr: &GroupVersionResource, namespace: &str) -> Result<Vec<Resource>> {
        let key = format!("list {gvr} {namespace}");
        if let Some(CachedLookup::List(found)) = self.store.get(&key) {
            return Ok(found);
        }

        log::debug!(target: LOG_TARGET, "Listing {gvr} in '{namespace}'");
        let found = self.client.list_resources(gvr, namespace)?;
        self.store.put(key, CachedLookup::List(found.clone()));
        Ok(found)
    }
}

/// Serves lookups from resources seeded up front, mapping kinds with the bundled snapshot
#[derive(Debug)]
pub struct StaticContextProvider {
    mapper: DiscoveryRestMapper,
    resources: InMemoryCluster,
}

impl StaticContextProvider {
    pub fn new() -> Result<Self> {
        Ok(Self {
            mapper: DiscoveryRestMapper::bundled()?,
            resources: InMemoryCluster::new(),
        })
    }

    pub fn add_resource(&mut self, gvr: GroupVersionResource, resource: Resource) {
        self.resources.insert_at(gvr, resource);
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

impl CelContextProvider for StaticContextProvider {
    fn resolve(&self, group_kind: &GroupKind, version: &str) -> Result<ResourceMapping> {
        self.mapper.rest_mapping(group_kind, version)
    }

    fn get_resource(&self, gvr: &GroupVersionResource, namespace: &str, name: &str) -> Result<Option<Resource>> {
        self.resources.get_resource(gvr, namespace, name)
    }

    fn list_resources(&self, gvr: &GroupVersionResource, namespace: &str) -> Result<Vec<Resource>> {
        self.resources.list_resources(gvr, namespace)
    }
}
