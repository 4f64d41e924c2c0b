use super::{EngineResponse, ImageVerificationMetadata, RuleResponse};
use crate::Result;
use crate::cluster::ClusterClient;
use crate::context::PolicyContext;
use crate::policy::AdmissionPolicyData;
use crate::resource::Resource;
use core::fmt::Debug;
use std::collections::BTreeMap;

/// Evaluates rule-based policies
///
/// Rule-level problems are reported inside the returned response rather than
/// as errors, so every method is infallible.
pub trait RuleEngine: Debug + Send + Sync {
    fn mutate(&self, context: &PolicyContext) -> EngineResponse;

    /// Verify images and report what was verified so it can be recorded on the resource
    fn verify_and_patch_images(&self, context: &PolicyContext) -> (EngineResponse, ImageVerificationMetadata);

    fn validate(&self, context: &PolicyContext) -> EngineResponse;

    /// Evaluate the generate rules, leaving resource creation to a [`GenerateHandler`]
    fn apply_background_checks(&self, context: &PolicyContext) -> EngineResponse;
}

/// Evaluates built-in validating admission policies
pub trait AdmissionEvaluator: Debug + Send + Sync {
    fn validate(
        &self,
        policy: &AdmissionPolicyData,
        resource: &Resource,
        namespace_labels: &BTreeMap<String, BTreeMap<String, String>>,
        client: Option<&dyn ClusterClient>,
    ) -> EngineResponse;
}

/// Produces the resources requested by generate rules
pub trait GenerateHandler: Debug + Send + Sync {
    /// Returns the rule outcomes to record in place of the engine's
    ///
    /// `clone_sources` maps rule names to the resource a clone rule copies.
    fn apply(
        &self,
        context: &PolicyContext,
        response: &EngineResponse,
        clone_sources: &BTreeMap<String, Resource>,
    ) -> Result<Vec<RuleResponse>>;
}

/// Receives mutated and generated resources as they are produced
pub trait OutputSink: Debug + Send + Sync {
    /// `resource_path` is `namespace/kind/name` of the resource under evaluation
    fn emit(&mut self, resource: &Resource, response: &EngineResponse, resource_path: &str, is_generate: bool) -> Result<()>;

    /// A free-form progress note such as "Mutation has been applied successfully."
    fn note(&mut self, message: &str) -> Result<()>;
}
