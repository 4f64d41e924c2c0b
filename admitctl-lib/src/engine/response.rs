use crate::policy::{AdmissionPolicy, CelPolicy, RulePolicy};
use crate::resource::Resource;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The disposition of one rule
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, strum::Display, strum::EnumIter, strum::IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RuleStatus {
    Pass,
    Fail,
    Warn,
    Error,
    Skip,
}

/// What kind of rule produced an outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "PascalCase")]
pub enum RuleType {
    Mutation,
    Validation,
    Generation,
    ImageVerify,
}

/// The outcome of one rule
#[derive(Debug, Clone, PartialEq)]
pub struct RuleResponse {
    name: String,
    rule_type: RuleType,
    status: RuleStatus,
    message: String,
    generated_resources: Vec<Resource>,
    patched_target: Option<Resource>,
}

impl RuleResponse {
    #[must_use]
    pub fn new(name: impl Into<String>, rule_type: RuleType, status: RuleStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rule_type,
            status,
            message: message.into(),
            generated_resources: Vec::new(),
            patched_target: None,
        }
    }

    #[must_use]
    pub fn pass(name: impl Into<String>, rule_type: RuleType, message: impl Into<String>) -> Self {
        Self::new(name, rule_type, RuleStatus::Pass, message)
    }

    #[must_use]
    pub fn fail(name: impl Into<String>, rule_type: RuleType, message: impl Into<String>) -> Self {
        Self::new(name, rule_type, RuleStatus::Fail, message)
    }

    #[must_use]
    pub fn warn(name: impl Into<String>, rule_type: RuleType, message: impl Into<String>) -> Self {
        Self::new(name, rule_type, RuleStatus::Warn, message)
    }

    #[must_use]
    pub fn error(name: impl Into<String>, rule_type: RuleType, message: impl Into<String>) -> Self {
        Self::new(name, rule_type, RuleStatus::Error, message)
    }

    #[must_use]
    pub fn skip(name: impl Into<String>, rule_type: RuleType, message: impl Into<String>) -> Self {
        Self::new(name, rule_type, RuleStatus::Skip, message)
    }

    #[must_use]
    pub fn with_generated_resources(mut self, resources: Vec<Resource>) -> Self {
        self.generated_resources = resources;
        self
    }

    /// Attach a secondary resource patched by a mutate-existing rule
    #[must_use]
    pub fn with_patched_target(mut self, target: Resource) -> Self {
        self.patched_target = Some(target);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn rule_type(&self) -> RuleType {
        self.rule_type
    }

    #[must_use]
    pub const fn status(&self) -> RuleStatus {
        self.status
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn generated_resources(&self) -> &[Resource] {
        &self.generated_resources
    }

    #[must_use]
    pub const fn patched_target(&self) -> Option<&Resource> {
        self.patched_target.as_ref()
    }
}

/// The policy an [`EngineResponse`] belongs to
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyRef {
    Rule(Arc<RulePolicy>),
    Admission(Arc<AdmissionPolicy>),
    Cel(Arc<CelPolicy>),
}

impl PolicyRef {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Rule(policy) => policy.name(),
            Self::Admission(policy) => policy.name(),
            Self::Cel(policy) => policy.name(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Rule(_) => "ClusterPolicy",
            Self::Admission(_) => "ValidatingAdmissionPolicy",
            Self::Cel(_) => "ValidatingPolicy",
        }
    }
}

/// The result of evaluating one policy against one resource
#[derive(Debug, Clone, PartialEq)]
pub struct EngineResponse {
    resource: Resource,
    patched_resource: Resource,
    policy: PolicyRef,
    rules: Vec<RuleResponse>,
}

impl EngineResponse {
    /// A response with no rule outcomes whose patched resource equals `resource`
    #[must_use]
    pub fn new(resource: Resource, policy: PolicyRef) -> Self {
        Self {
            patched_resource: resource.clone(),
            resource,
            policy,
            rules: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_patched_resource(mut self, patched_resource: Resource) -> Self {
        self.patched_resource = patched_resource;
        self
    }

    #[must_use]
    pub fn with_rules(mut self, rules: Vec<RuleResponse>) -> Self {
        self.rules = rules;
        self
    }

    pub fn push_rule(&mut self, rule: RuleResponse) {
        self.rules.push(rule);
    }

    pub fn set_rules(&mut self, rules: Vec<RuleResponse>) {
        self.rules = rules;
    }

    pub fn set_patched_resource(&mut self, patched_resource: Resource) {
        self.patched_resource = patched_resource;
    }

    #[must_use]
    pub const fn resource(&self) -> &Resource {
        &self.resource
    }

    #[must_use]
    pub const fn patched_resource(&self) -> &Resource {
        &self.patched_resource
    }

    #[must_use]
    pub fn into_patched_resource(self) -> Resource {
        self.patched_resource
    }

    #[must_use]
    pub const fn policy(&self) -> &PolicyRef {
        &self.policy
    }

    #[must_use]
    pub fn policy_name(&self) -> &str {
        self.policy.name()
    }

    #[must_use]
    pub fn rules(&self) -> &[RuleResponse] {
        &self.rules
    }

    /// True when no rule produced an outcome
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    #[must_use]
    pub fn is_successful(&self) -> bool {
        !self.rules.iter().any(|rule| matches!(rule.status, RuleStatus::Fail | RuleStatus::Error))
    }
}
