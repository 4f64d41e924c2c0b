use super::{LabelSelector, ObjectMeta};
use crate::resource::GroupVersionResource;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A built-in `ValidatingAdmissionPolicy`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionPolicy {
    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: AdmissionPolicySpec,
}

impl AdmissionPolicy {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionPolicySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_constraints: Option<MatchConstraints>,

    #[serde(default)]
    pub variables: Vec<NamedExpression>,

    #[serde(default)]
    pub validations: Vec<AdmissionValidation>,

    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

/// Which requests a CEL policy applies to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchConstraints {
    #[serde(default)]
    pub resource_rules: Vec<ResourceRule>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,
}

impl MatchConstraints {
    /// Whether any resource rule admits `operation` on `gvr`
    ///
    /// No resource rules means everything matches.
    #[must_use]
    pub fn matches(&self, gvr: &GroupVersionResource, operation: &str) -> bool {
        self.resource_rules.is_empty() || self.resource_rules.iter().any(|rule| rule.matches(gvr, operation))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRule {
    #[serde(default)]
    pub api_groups: Vec<String>,

    #[serde(default)]
    pub api_versions: Vec<String>,

    #[serde(default)]
    pub resources: Vec<String>,

    #[serde(default)]
    pub operations: Vec<String>,
}

impl ResourceRule {
    #[must_use]
    pub fn matches(&self, gvr: &GroupVersionResource, operation: &str) -> bool {
        let listed = |values: &[String], actual: &str| values.iter().any(|v| v == "*" || v == actual);

        listed(&self.api_groups, &gvr.group)
            && listed(&self.api_versions, &gvr.version)
            && listed(&self.resources, &gvr.resource)
            && (self.operations.is_empty() || listed(&self.operations, operation))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedExpression {
    pub name: String,
    pub expression: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionValidation {
    pub expression: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// What happens when an expression cannot be evaluated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailurePolicy {
    #[default]
    Fail,
    Ignore,
}

/// How a failed validation is acted upon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum ValidationAction {
    Deny,
    Warn,
    Audit,
}

/// A `ValidatingAdmissionPolicyBinding`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionPolicyBinding {
    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: BindingSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingSpec {
    #[serde(default)]
    pub policy_name: String,

    #[serde(default)]
    pub validation_actions: Vec<ValidationAction>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_resources: Option<BindingMatchResources>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingMatchResources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,
}

/// An admission policy together with the bindings that name it
#[derive(Debug, Clone)]
pub struct AdmissionPolicyData {
    policy: Arc<AdmissionPolicy>,
    bindings: Vec<Arc<AdmissionPolicyBinding>>,
}

impl AdmissionPolicyData {
    #[must_use]
    pub const fn new(policy: Arc<AdmissionPolicy>) -> Self {
        Self {
            policy,
            bindings: Vec::new(),
        }
    }

    pub fn add_binding(&mut self, binding: Arc<AdmissionPolicyBinding>) {
        self.bindings.push(binding);
    }

    #[must_use]
    pub fn policy(&self) -> &Arc<AdmissionPolicy> {
        &self.policy
    }

    #[must_use]
    pub fn bindings(&self) -> &[Arc<AdmissionPolicyBinding>] {
        &self.bindings
    }
}
