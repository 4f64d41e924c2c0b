use crate::Result;
use crate::resource::GroupVersionKind;
use camino::Utf8Path;
use ohno::{IntoAppError, app_err};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;

/// The contents of a values file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Values {
    /// Bindings applied to every policy and resource
    #[serde(default)]
    pub global_values: BTreeMap<String, Value>,

    #[serde(default)]
    pub policies: Vec<PolicyValues>,

    /// Labels of namespaces that are not otherwise available
    #[serde(default)]
    pub namespace_selector: Vec<NamespaceSelector>,

    #[serde(default)]
    pub subresources: Vec<Subresource>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyValues {
    pub name: String,

    #[serde(default)]
    pub resources: Vec<ResourceValues>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceValues {
    pub name: String,

    #[serde(default)]
    pub values: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceSelector {
    pub name: String,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Declares that `subresource` is served beneath `parent_resource`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subresource {
    pub subresource: ApiResourceRef,
    pub parent_resource: ApiResourceRef,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResourceRef {
    /// Plural name, `deployments/scale` for a subresource
    pub name: String,

    #[serde(default)]
    pub group: String,

    #[serde(default)]
    pub version: String,

    pub kind: String,
}

impl ApiResourceRef {
    #[must_use]
    pub fn group_version_kind(&self) -> GroupVersionKind {
        GroupVersionKind::new(&self.group, &self.version, &self.kind)
    }
}

impl Subresource {
    /// The part of the subresource name after `/`, e.g. `scale`
    #[must_use]
    pub fn short_name(&self) -> &str {
        self.subresource
            .name
            .split_once('/')
            .map_or(self.subresource.name.as_str(), |(_, name)| name)
    }
}

impl Values {
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).into_app_err("parsing values")
    }

    pub fn load(path: &Utf8Path) -> Result<Self> {
        let text = fs::read_to_string(path).into_app_err_with(|| format!("reading values file '{path}'"))?;
        Self::from_yaml(&text).map_err(|e| app_err!("loading '{path}': {e}"))
    }

    /// Namespace name to label set
    #[must_use]
    pub fn namespace_labels(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        self.namespace_selector
            .iter()
            .map(|selector| (selector.name.clone(), selector.labels.clone()))
            .collect()
    }

    /// Values for one resource under one policy
    #[must_use]
    pub fn resource_values(&self, policy_name: &str, resource_name: &str) -> Option<&BTreeMap<String, Value>> {
        self.policies
            .iter()
            .find(|policy| policy.name == policy_name)?
            .resources
            .iter()
            .find(|resource| resource.name == resource_name)
            .map(|resource| &resource.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const VALUES: &str = r"
apiVersion: cli.kyverno.io/v1alpha1
kind: Values
globalValues:
  request.operation: UPDATE
policies:
  - name: add-labels
    resources:
      - name: web
        values:
          team: payments
          replicas: 3
namespaceSelector:
  - name: prod
    labels:
      env: production
subresources:
  - subresource:
      name: deployments/scale
      kind: Scale
      group: autoscaling
      version: v1
    parentResource:
      name: deployments
      kind: Deployment
      group: apps
      version: v1
";

    #[test]
    fn test_parses_values_file() {
        let values = Values::from_yaml(VALUES).unwrap();
        assert_eq!(values.global_values["request.operation"], json!("UPDATE"));

        let resource_values = values.resource_values("add-labels", "web").unwrap();
        assert_eq!(resource_values["team"], json!("payments"));
        assert_eq!(resource_values["replicas"], json!(3));
        assert!(values.resource_values("add-labels", "other").is_none());
        assert!(values.resource_values("other", "web").is_none());

        let namespaces = values.namespace_labels();
        assert_eq!(namespaces["prod"]["env"], "production");

        assert_eq!(values.subresources[0].short_name(), "scale");
        assert_eq!(
            values.subresources[0].parent_resource.group_version_kind(),
            GroupVersionKind::new("apps", "v1", "Deployment")
        );
    }

    #[test]
    fn test_empty_values_file() {
        let values = Values::from_yaml("{}").unwrap();
        assert!(values.policies.is_empty());
        assert!(values.namespace_labels().is_empty());
    }
}
