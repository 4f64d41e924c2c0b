use super::{MatchResources, ObjectMeta};
use crate::patch::PatchOperation;
use crate::resource::{GroupVersionKind, Resource};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Annotation marking a policy whose failures only count as warnings when set to `"false"`
pub const SCORED_ANNOTATION: &str = "policies.admitctl.io/scored";

/// A rule-based policy (`ClusterPolicy` or namespaced `Policy`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RulePolicy {
    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: PolicySpec,
}

impl RulePolicy {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.spec.rules
    }

    #[must_use]
    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.spec.rules.iter().find(|rule| rule.name == name)
    }

    #[must_use]
    pub fn has_mutate(&self) -> bool {
        self.spec.rules.iter().any(Rule::has_mutate)
    }

    #[must_use]
    pub fn has_validate(&self) -> bool {
        self.spec.rules.iter().any(Rule::has_validate)
    }

    #[must_use]
    pub fn has_generate(&self) -> bool {
        self.spec.rules.iter().any(Rule::has_generate)
    }

    #[must_use]
    pub fn has_verify_images(&self) -> bool {
        self.spec.rules.iter().any(Rule::has_verify_images)
    }

    /// Whether the validate phase has anything to do for this policy
    #[must_use]
    pub fn has_validate_or_verify_image_checks(&self) -> bool {
        self.spec.rules.iter().any(|rule| rule.has_validate() || rule.has_verify_image_checks())
    }

    /// Unscored policies have their failures reported as warnings
    #[must_use]
    pub fn is_scored(&self) -> bool {
        self.metadata.annotations.get(SCORED_ANNOTATION).is_none_or(|value| value != "false")
    }

    #[must_use]
    pub const fn failure_action(&self) -> FailureAction {
        self.spec.validation_failure_action
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
    #[serde(default)]
    pub rules: Vec<Rule>,

    #[serde(default)]
    pub validation_failure_action: FailureAction,

    #[serde(default = "default_true")]
    pub background: bool,
}

impl Default for PolicySpec {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            validation_failure_action: FailureAction::default(),
            background: true,
        }
    }
}

/// What a failing validation does at admission time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum FailureAction {
    #[default]
    #[serde(alias = "audit")]
    Audit,

    #[serde(alias = "enforce")]
    Enforce,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub name: String,

    #[serde(rename = "match", default)]
    pub match_resources: MatchResources,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<MatchResources>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutate: Option<Mutation>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validate: Option<Validation>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate: Option<Generation>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verify_images: Vec<ImageVerification>,
}

impl Rule {
    #[must_use]
    pub const fn has_mutate(&self) -> bool {
        self.mutate.is_some()
    }

    #[must_use]
    pub const fn has_validate(&self) -> bool {
        self.validate.is_some()
    }

    #[must_use]
    pub const fn has_generate(&self) -> bool {
        self.generate.is_some()
    }

    #[must_use]
    pub fn has_verify_images(&self) -> bool {
        !self.verify_images.is_empty()
    }

    /// Image verification entries that also require a validation pass
    #[must_use]
    pub fn has_verify_image_checks(&self) -> bool {
        self.verify_images.iter().any(|v| v.verify_digest || v.required)
    }

    /// Whether the rule's `match` block selects the resource and its `exclude` block does not
    #[must_use]
    pub fn matches(
        &self,
        resource: &Resource,
        gvk: &GroupVersionKind,
        subresource: &str,
        namespace_labels: &BTreeMap<String, String>,
    ) -> bool {
        let excluded = self
            .exclude
            .as_ref()
            .is_some_and(|exclude| !exclude.is_empty() && exclude.matches(resource, gvk, subresource, namespace_labels));

        !excluded && self.match_resources.matches(resource, gvk, subresource, namespace_labels)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mutation {
    /// Merged into the resource (RFC 7386 semantics)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_strategic_merge: Option<Value>,

    #[serde(default, rename = "patchesJson6902", skip_serializing_if = "Vec::is_empty")]
    pub patches_json6902: Vec<PatchOperation>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Validation {
    #[serde(default)]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cel: Option<CelValidation>,

    /// Overrides the policy-wide failure action for this rule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_action: Option<FailureAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CelValidation {
    #[serde(default)]
    pub expressions: Vec<ValidationExpression>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationExpression {
    pub expression: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Describes a resource a rule creates, either from inline `data` or by
/// cloning an existing resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Generation {
    #[serde(default)]
    pub api_version: String,

    #[serde(default)]
    pub kind: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub namespace: String,

    #[serde(default)]
    pub synchronize: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone: Option<CloneFrom>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneFrom {
    #[serde(default)]
    pub namespace: String,

    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[expect(clippy::struct_excessive_bools, reason = "mirrors the policy document")]
pub struct ImageVerification {
    #[serde(default)]
    pub image_references: Vec<String>,

    /// Images must be pinned by digest
    #[serde(default = "default_true")]
    pub verify_digest: bool,

    /// Matching images must have been verified before validation passes
    #[serde(default = "default_true")]
    pub required: bool,

    #[serde(default)]
    pub mutate_digest: bool,
}

const fn default_true() -> bool {
    true
}
