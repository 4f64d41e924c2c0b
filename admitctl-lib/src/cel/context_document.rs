use super::{CelContextProvider, GlobalContextStore, LiveContextProvider, StaticContextProvider};
use crate::Result;
use crate::cluster::ClusterClient;
use crate::resource::Resource;
use camino::Utf8Path;
use ohno::{IntoAppError, app_err, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::sync::Arc;

const LOG_TARGET: &str = "  provider";

/// Resources made available to CEL policies when no cluster is present
///
/// ```yaml
/// apiVersion: cli.admitctl.io/v1alpha1
/// kind: Context
/// spec:
///   resources:
///     - apiVersion: v1
///       kind: ConfigMap
///       metadata: { name: settings, namespace: default }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextDocument {
    #[serde(default)]
    pub kind: String,

    #[serde(default)]
    pub spec: ContextSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextSpec {
    #[serde(default)]
    pub resources: Vec<Resource>,
}

impl ContextDocument {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let document: Self = serde_yaml::from_str(text).into_app_err("parsing context document")?;
        if document.kind != "Context" {
            bail!("expected a document of kind 'Context', found '{}'", document.kind);
        }
        Ok(document)
    }

    pub fn load(path: &Utf8Path) -> Result<Self> {
        let text = fs::read_to_string(path).into_app_err_with(|| format!("reading context file '{path}'"))?;
        Self::from_yaml(&text).map_err(|e| app_err!("loading '{path}': {e}"))
    }
}

/// Choose the context provider for one run
///
/// With a cluster client, lookups go to the cluster through a fresh
/// [`GlobalContextStore`]. Without one, the provider is seeded from the
/// optional context document and every seeded resource must map to a known
/// kind.
pub fn select_context_provider(client: Option<&Arc<dyn ClusterClient>>, context_path: Option<&Utf8Path>) -> Result<Arc<dyn CelContextProvider>> {
    if let Some(client) = client {
        log::debug!(target: LOG_TARGET, "Using the cluster as CEL context provider");
        let provider = LiveContextProvider::new(Arc::clone(client), GlobalContextStore::new())?;
        return Ok(Arc::new(provider));
    }

    let mut provider = StaticContextProvider::new()?;
    if let Some(path) = context_path {
        let document = ContextDocument::load(path)?;
        for resource in document.spec.resources {
            let gvk = resource.group_version_kind();
            let mapping = provider.resolve(&gvk.group_kind(), &gvk.version)?;
            provider.add_resource(mapping.resource, resource);
        }
        log::debug!(target: LOG_TARGET, "Seeded the offline CEL context with {} resource(s) from '{path}'", provider.len());
    }
    Ok(Arc::new(provider))
}
