use crate::Result;
use crate::cel::CelEngine;
use crate::cluster::ClusterClient;
use crate::context::RequestInfo;
use crate::engine::{AdmissionEvaluator, BuiltinRuleEngine, CelAdmissionEvaluator, GenerateHandler, RuleEngine, TemplateGenerateHandler};
use crate::policy::{AdmissionPolicy, AdmissionPolicyBinding, CelPolicy, CelPolicyException, PolicyException, PolicySet, RulePolicy};
use crate::resource::Resource;
use crate::variables::{Subresource, VariableResolver};
use camino::Utf8PathBuf;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Everything one evaluation run needs
///
/// Either `resource` or `json_payload` may be absent. Rule-based phases only run
/// for a structured resource, and the CEL phase evaluates whichever inputs are
/// present.
#[derive(Debug, Clone, Default)]
pub struct EvaluationRequest {
    pub resource: Option<Resource>,
    pub json_payload: Option<Resource>,
    pub policies: Vec<Arc<RulePolicy>>,
    pub admission_policies: Vec<Arc<AdmissionPolicy>>,
    pub admission_bindings: Vec<Arc<AdmissionPolicyBinding>>,
    pub cel_policies: Vec<Arc<CelPolicy>>,
    pub cel_exceptions: Vec<Arc<CelPolicyException>>,
    pub exceptions: Vec<Arc<PolicyException>>,
    pub request_info: Option<RequestInfo>,

    /// Namespace name to namespace labels
    pub namespace_labels: BTreeMap<String, BTreeMap<String, String>>,
    pub variables: Option<Arc<dyn VariableResolver>>,
    pub subresources: Vec<Subresource>,

    /// Rule name to the resource its clone rule copies
    pub clone_sources: BTreeMap<String, Resource>,

    /// Context document seeding the offline CEL provider
    pub context_path: Option<Utf8PathBuf>,

    /// Report failures of `Audit` policies as warnings
    pub audit_warn: bool,
}

impl EvaluationRequest {
    /// A request evaluating every policy of `policies` against `resource`
    #[must_use]
    pub fn new(resource: Resource, policies: &PolicySet) -> Self {
        Self {
            resource: Some(resource),
            ..Self::default()
        }
        .with_policies(policies)
    }

    #[must_use]
    pub fn with_policies(mut self, policies: &PolicySet) -> Self {
        self.policies.clone_from(&policies.policies);
        self.admission_policies.clone_from(&policies.admission_policies);
        self.admission_bindings.clone_from(&policies.admission_bindings);
        self.cel_policies.clone_from(&policies.cel_policies);
        self.cel_exceptions.clone_from(&policies.cel_exceptions);
        self.exceptions.clone_from(&policies.exceptions);
        self
    }
}

/// The engines a [`PolicyProcessor`](super::PolicyProcessor) delegates to
#[derive(Debug, Clone)]
pub struct Collaborators {
    pub rule_engine: Arc<dyn RuleEngine>,
    pub admission_evaluator: Arc<dyn AdmissionEvaluator>,
    pub generate_handler: Arc<dyn GenerateHandler>,

    /// Engine for CEL policies; when absent one is built from the request's policies
    pub cel_engine: Option<Arc<dyn CelEngine>>,

    /// A live cluster; `None` runs offline
    pub client: Option<Arc<dyn ClusterClient>>,
}

impl Collaborators {
    /// The engines shipped with this crate, running offline
    ///
    /// # Errors
    ///
    /// Returns an error if the bundled discovery snapshot cannot be parsed
    pub fn builtin() -> Result<Self> {
        Ok(Self {
            rule_engine: Arc::new(BuiltinRuleEngine::new()),
            admission_evaluator: Arc::new(CelAdmissionEvaluator::bundled()?),
            generate_handler: Arc::new(TemplateGenerateHandler::new()),
            cel_engine: None,
            client: None,
        })
    }

    #[must_use]
    pub fn with_client(mut self, client: Arc<dyn ClusterClient>) -> Self {
        self.client = Some(client);
        self
    }
}
