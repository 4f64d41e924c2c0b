use super::{MatchResources, ObjectMeta, wildcard_match};
use crate::resource::{GroupVersionKind, Resource};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Suppresses named rules of rule-based policies for matching resources
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyException {
    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: PolicyExceptionSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyExceptionSpec {
    #[serde(default)]
    pub exceptions: Vec<ExceptionEntry>,

    #[serde(rename = "match", default)]
    pub match_resources: MatchResources,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionEntry {
    pub policy_name: String,

    /// Rule names, wildcards allowed
    #[serde(default)]
    pub rule_names: Vec<String>,
}

impl PolicyException {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Whether any entry names the policy, regardless of rule
    #[must_use]
    pub fn names_policy(&self, policy_name: &str) -> bool {
        self.spec.exceptions.iter().any(|e| e.policy_name == policy_name)
    }

    #[must_use]
    pub fn covers_rule(&self, policy_name: &str, rule_name: &str) -> bool {
        self.spec
            .exceptions
            .iter()
            .filter(|e| e.policy_name == policy_name)
            .any(|e| e.rule_names.iter().any(|pattern| wildcard_match(pattern, rule_name)))
    }

    /// Whether the exception suppresses `rule_name` of `policy_name` for this resource
    #[must_use]
    pub fn applies(
        &self,
        policy_name: &str,
        rule_name: &str,
        resource: &Resource,
        gvk: &GroupVersionKind,
        subresource: &str,
        namespace_labels: &BTreeMap<String, String>,
    ) -> bool {
        self.covers_rule(policy_name, rule_name)
            && self.spec.match_resources.matches(resource, gvk, subresource, namespace_labels)
    }
}
