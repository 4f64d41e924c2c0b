use super::{AdmissionValidation, MatchConstraints, NamedExpression, ObjectMeta, ValidationAction};
use serde::{Deserialize, Serialize};

/// A CEL `ValidatingPolicy`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CelPolicy {
    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: CelPolicySpec,
}

impl CelPolicy {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    #[must_use]
    pub fn evaluation_mode(&self) -> EvaluationMode {
        self.spec.evaluation.as_ref().map(|e| e.mode).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CelPolicySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<EvaluationConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_constraints: Option<MatchConstraints>,

    #[serde(default)]
    pub match_conditions: Vec<MatchCondition>,

    #[serde(default)]
    pub variables: Vec<NamedExpression>,

    #[serde(default)]
    pub validations: Vec<AdmissionValidation>,

    /// Defaults to `Deny` when empty
    #[serde(default)]
    pub validation_actions: Vec<ValidationAction>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default)]
    pub mode: EvaluationMode,
}

/// Whether a policy reads admission requests or arbitrary JSON payloads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvaluationMode {
    #[default]
    Kubernetes,

    #[serde(rename = "JSON")]
    Json,
}

/// A named boolean expression gating whether a policy or exception applies
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchCondition {
    pub name: String,
    pub expression: String,
}

/// Suppresses CEL policies for requests matching its conditions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CelPolicyException {
    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: CelPolicyExceptionSpec,
}

impl CelPolicyException {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    #[must_use]
    pub fn refers_to(&self, policy_name: &str) -> bool {
        self.spec.policy_refs.iter().any(|r| r.name == policy_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CelPolicyExceptionSpec {
    #[serde(default)]
    pub policy_refs: Vec<PolicyRefName>,

    /// Every condition must hold for the exception to apply
    #[serde(default)]
    pub match_conditions: Vec<MatchCondition>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRefName {
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
}
