//! Policy documents
//!
//! Policies are read from multi-document YAML and dispatched on their `kind`:
//!
//! - `ClusterPolicy` / `Policy`: rule-based [`RulePolicy`] with mutate, validate,
//!   generate and image-verification rules
//! - `ValidatingAdmissionPolicy` and its `ValidatingAdmissionPolicyBinding`:
//!   built-in [`AdmissionPolicy`] evaluated with CEL
//! - `ValidatingPolicy`: CEL validating [`CelPolicy`]
//! - `PolicyException` / `CELPolicyException`: overrides suppressing rules
//!
//! [`PolicySet::from_yaml`] and [`PolicySet::load_files`] are the entry points.

mod admission_policy;
mod cel_policy;
mod exception;
mod loader;
mod matching;
mod meta;
mod rule_policy;

pub use admission_policy::{
    AdmissionPolicy, AdmissionPolicyBinding, AdmissionPolicyData, AdmissionPolicySpec, AdmissionValidation, BindingMatchResources,
    BindingSpec, FailurePolicy, MatchConstraints, NamedExpression, ResourceRule, ValidationAction,
};
pub use cel_policy::{
    CelPolicy, CelPolicyException, CelPolicyExceptionSpec, CelPolicySpec, EvaluationConfig, EvaluationMode, MatchCondition, PolicyRefName,
};
pub use exception::{ExceptionEntry, PolicyException, PolicyExceptionSpec};
pub use loader::{PolicySet, load_documents, load_resources};
pub use matching::{
    KindPattern, LabelSelector, LabelSelectorOperator, LabelSelectorRequirement, MatchResources, MatchResourcesEntry, ResourceFilter,
    wildcard_match,
};
pub use meta::ObjectMeta;
pub use rule_policy::{
    CloneFrom, CelValidation, FailureAction, Generation, ImageVerification, Mutation, PolicySpec, Rule, RulePolicy, SCORED_ANNOTATION,
    Validation, ValidationExpression,
};
