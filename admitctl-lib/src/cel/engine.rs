use super::{CelRequest, RequestPayload, bind_variables, conditions_hold, failed_validations, register_provider_functions, to_cel_value};
use crate::Result;
use crate::engine::{RuleResponse, RuleType};
use crate::policy::{CelPolicy, CelPolicyException, EvaluationMode, ValidationAction};
use crate::resource::Resource;
use cel_interpreter::Context;
use core::fmt::Debug;
use std::collections::BTreeMap;
use std::sync::Arc;

const LOG_TARGET: &str = "       cel";

/// Evaluates CEL validating policies
pub trait CelEngine: Debug + Send + Sync {
    fn handle(&self, request: &CelRequest) -> Result<CelResponse>;
}

/// The outcomes of one request across every applicable policy
#[derive(Debug, Clone, PartialEq)]
pub struct CelResponse {
    pub resource: Resource,
    pub policies: Vec<CelPolicyResponse>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CelPolicyResponse {
    pub policy: Arc<CelPolicy>,
    pub rules: Vec<RuleResponse>,
}

/// The built-in [`CelEngine`]
///
/// Kubernetes-mode policies are evaluated against admission requests and JSON-mode
/// policies against JSON payloads. Policies whose match constraints or match
/// conditions reject the request are left out of the response.
#[derive(Debug, Clone, Default)]
pub struct CelPolicyEngine {
    policies: Vec<Arc<CelPolicy>>,
    exceptions: Vec<Arc<CelPolicyException>>,
    namespace_labels: BTreeMap<String, BTreeMap<String, String>>,
}

impl CelPolicyEngine {
    #[must_use]
    pub const fn new(
        policies: Vec<Arc<CelPolicy>>,
        exceptions: Vec<Arc<CelPolicyException>>,
        namespace_labels: BTreeMap<String, BTreeMap<String, String>>,
    ) -> Self {
        Self {
            policies,
            exceptions,
            namespace_labels,
        }
    }

    fn context(&self, request: &CelRequest) -> Context<'static> {
        let mut context = match request.payload() {
            RequestPayload::Admission(attributes) => attributes.activation(self.namespace_labels.get(&attributes.namespace)),
            RequestPayload::Json(payload) => {
                let mut context = Context::default();
                context.add_variable_from_value("object", to_cel_value(&payload.to_value()));
                context
            }
        };
        register_provider_functions(&mut context, request.provider());
        context
    }

    fn applies(&self, policy: &CelPolicy, request: &CelRequest) -> bool {
        match (request.payload(), policy.evaluation_mode()) {
            (RequestPayload::Json(_), EvaluationMode::Json) => true,
            (RequestPayload::Admission(attributes), EvaluationMode::Kubernetes) => {
                policy.spec.match_constraints.as_ref().is_none_or(|constraints| {
                    let labels = self.namespace_labels.get(&attributes.namespace).cloned().unwrap_or_default();
                    constraints.matches(&attributes.gvr, attributes.operation.as_str())
                        && (attributes.namespace.is_empty()
                            || constraints.namespace_selector.as_ref().is_none_or(|selector| selector.matches(&labels)))
                })
            }
            _ => false,
        }
    }

    fn evaluate(&self, policy: &CelPolicy, request: &CelRequest) -> Option<RuleResponse> {
        let name = policy.name();
        let mut context = self.context(request);

        match conditions_hold(&context, &policy.spec.match_conditions) {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => return Some(RuleResponse::error(name, RuleType::Validation, e.to_string())),
        }

        for exception in self.exceptions.iter().filter(|exception| exception.refers_to(name)) {
            match conditions_hold(&context, &exception.spec.match_conditions) {
                Ok(true) => {
                    return Some(RuleResponse::skip(
                        name,
                        RuleType::Validation,
                        format!("rule is skipped due to policy exception {}", exception.name()),
                    ));
                }
                Ok(false) => {}
                Err(e) => return Some(RuleResponse::error(name, RuleType::Validation, e.to_string())),
            }
        }

        let failures = match bind_variables(&mut context, &policy.spec.variables)
            .and_then(|()| failed_validations(&context, &policy.spec.validations))
        {
            Ok(failures) => failures,
            Err(e) => return Some(RuleResponse::error(name, RuleType::Validation, e.to_string())),
        };

        if failures.is_empty() {
            return Some(RuleResponse::pass(name, RuleType::Validation, "validation passed"));
        }

        let message = failures.join("; ");
        let actions = &policy.spec.validation_actions;
        if actions.is_empty() || actions.contains(&ValidationAction::Deny) {
            Some(RuleResponse::fail(name, RuleType::Validation, message))
        } else {
            Some(RuleResponse::warn(name, RuleType::Validation, message))
        }
    }
}

impl CelEngine for CelPolicyEngine {
    fn handle(&self, request: &CelRequest) -> Result<CelResponse> {
        let mut policies = Vec::new();
        for policy in &self.policies {
            if !self.applies(policy, request) {
                continue;
            }
            if let Some(rule) = self.evaluate(policy, request) {
                log::debug!(target: LOG_TARGET, "Policy '{}' evaluated to {}", policy.name(), rule.status());
                policies.push(CelPolicyResponse {
                    policy: Arc::clone(policy),
                    rules: vec![rule],
                });
            }
        }

        Ok(CelResponse {
            resource: request.resource().clone(),
            policies,
        })
    }
}
