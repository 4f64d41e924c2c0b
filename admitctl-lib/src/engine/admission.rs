use super::{AdmissionEvaluator, EngineResponse, PolicyRef, RuleResponse, RuleType};
use crate::Result;
use crate::cel::{AdmissionAttributes, bind_variables, failed_validations};
use crate::cluster::ClusterClient;
use crate::context::UserInfo;
use crate::policy::{AdmissionPolicy, AdmissionPolicyBinding, AdmissionPolicyData, FailurePolicy, ValidationAction};
use crate::resource::{DiscoveryRestMapper, GroupVersionResource, Resource, ResourceMapping, Scope};
use std::collections::BTreeMap;
use std::sync::Arc;

const LOG_TARGET: &str = " admission";

/// Validating admission policies are only ever simulated as creations
const OPERATION: &str = "CREATE";

/// The built-in [`AdmissionEvaluator`], backed by the CEL interpreter
///
/// Kinds are mapped to resources with the cluster's discovery document when a
/// client is supplied and with the configured mapper otherwise.
#[derive(Debug, Clone)]
pub struct CelAdmissionEvaluator {
    mapper: DiscoveryRestMapper,
}

impl CelAdmissionEvaluator {
    #[must_use]
    pub const fn new(mapper: DiscoveryRestMapper) -> Self {
        Self { mapper }
    }

    /// An evaluator that maps kinds with the bundled discovery snapshot
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be parsed
    pub fn bundled() -> Result<Self> {
        Ok(Self::new(DiscoveryRestMapper::bundled()?))
    }

    fn mapping(&self, resource: &Resource, client: Option<&dyn ClusterClient>) -> Result<ResourceMapping> {
        let gvk = resource.group_version_kind();
        match client {
            Some(client) => DiscoveryRestMapper::new(client.discovery()?).rest_mapping(&gvk.group_kind(), &gvk.version),
            None => self.mapper.rest_mapping(&gvk.group_kind(), &gvk.version),
        }
    }
}

impl AdmissionEvaluator for CelAdmissionEvaluator {
    fn validate(
        &self,
        data: &AdmissionPolicyData,
        resource: &Resource,
        namespace_labels: &BTreeMap<String, BTreeMap<String, String>>,
        client: Option<&dyn ClusterClient>,
    ) -> EngineResponse {
        let policy = data.policy();
        let mut response = EngineResponse::new(resource.clone(), PolicyRef::Admission(Arc::clone(policy)));

        let mapping = match self.mapping(resource, client) {
            Ok(mapping) => mapping,
            Err(e) => {
                response.push_rule(RuleResponse::error(policy.name(), RuleType::Validation, e.to_string()));
                return response;
            }
        };

        let namespace = resource.namespace();
        let namespaced = mapping.scope == Scope::Namespaced && !namespace.is_empty();
        let labels = if namespaced {
            match namespace_labels.get(namespace) {
                Some(labels) => labels.clone(),
                None => match fetch_namespace_labels(namespace, client) {
                    Ok(labels) => labels,
                    Err(e) => {
                        response.push_rule(RuleResponse::error(policy.name(), RuleType::Validation, e.to_string()));
                        return response;
                    }
                },
            }
        } else {
            BTreeMap::new()
        };

        let constraints_match = policy.spec.match_constraints.as_ref().is_none_or(|constraints| {
            constraints.matches(&mapping.resource, OPERATION)
                && (!namespaced || constraints.namespace_selector.as_ref().is_none_or(|selector| selector.matches(&labels)))
        });
        if !constraints_match {
            log::debug!(target: LOG_TARGET, "Policy '{}' does not match {}", policy.name(), mapping.resource);
            return response;
        }

        let attributes = AdmissionAttributes::create(resource.clone(), mapping.resource, UserInfo::default());
        let activation_labels = namespaced.then_some(&labels);

        if data.bindings().is_empty() {
            response.push_rule(evaluate(policy, policy.name(), &[ValidationAction::Deny], &attributes, activation_labels));
            return response;
        }

        for binding in data.bindings() {
            if namespaced && !binding_selects(binding, &labels) {
                log::debug!(target: LOG_TARGET, "Binding '{}' does not select namespace '{namespace}'", binding.metadata.name);
                continue;
            }
            let actions = if binding.spec.validation_actions.is_empty() {
                &[ValidationAction::Deny][..]
            } else {
                &binding.spec.validation_actions[..]
            };
            response.push_rule(evaluate(policy, &binding.metadata.name, actions, &attributes, activation_labels));
        }
        response
    }
}

fn binding_selects(binding: &AdmissionPolicyBinding, labels: &BTreeMap<String, String>) -> bool {
    binding
        .spec
        .match_resources
        .as_ref()
        .and_then(|resources| resources.namespace_selector.as_ref())
        .is_none_or(|selector| selector.matches(labels))
}

fn fetch_namespace_labels(namespace: &str, client: Option<&dyn ClusterClient>) -> Result<BTreeMap<String, String>> {
    let Some(client) = client else {
        return Ok(BTreeMap::new());
    };
    let namespaces = GroupVersionResource::new("", "v1", "namespaces");
    Ok(client
        .get_resource(&namespaces, "", namespace)?
        .map(|ns| ns.labels())
        .unwrap_or_default())
}

fn evaluate(
    policy: &AdmissionPolicy,
    rule_name: &str,
    actions: &[ValidationAction],
    attributes: &AdmissionAttributes,
    namespace_labels: Option<&BTreeMap<String, String>>,
) -> RuleResponse {
    let mut context = attributes.activation(namespace_labels);
    let failures = match bind_variables(&mut context, &policy.spec.variables)
        .and_then(|()| failed_validations(&context, &policy.spec.validations))
    {
        Ok(failures) => failures,
        Err(e) => {
            return match policy.spec.failure_policy {
                FailurePolicy::Ignore => RuleResponse::skip(rule_name, RuleType::Validation, format!("evaluation error ignored: {e}")),
                FailurePolicy::Fail => RuleResponse::error(rule_name, RuleType::Validation, e.to_string()),
            };
        }
    };

    if failures.is_empty() {
        return RuleResponse::pass(rule_name, RuleType::Validation, "validation passed");
    }

    let message = failures.join("; ");
    if actions.contains(&ValidationAction::Deny) {
        RuleResponse::fail(rule_name, RuleType::Validation, message)
    } else {
        RuleResponse::warn(rule_name, RuleType::Validation, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::InMemoryCluster;
    use crate::engine::RuleStatus;
    use serde_json::json;

    fn data(bindings: &[serde_json::Value]) -> AdmissionPolicyData {
        let policy: AdmissionPolicy = serde_json::from_value(json!({
            "metadata": {"name": "max-replicas"},
            "spec": {
                "matchConstraints": {"resourceRules": [{
                    "apiGroups": ["apps"], "apiVersions": ["v1"], "resources": ["deployments"], "operations": ["CREATE", "UPDATE"]
                }]},
                "validations": [{"expression": "object.spec.replicas <= 3", "message": "at most 3 replicas"}]
            }
        }))
        .unwrap();
        let mut data = AdmissionPolicyData::new(Arc::new(policy));
        for binding in bindings {
            data.add_binding(Arc::new(serde_json::from_value(binding.clone()).unwrap()));
        }
        data
    }

    fn deployment(replicas: i64) -> Resource {
        Resource::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "prod"},
            "spec": {"replicas": replicas}
        }))
        .unwrap()
    }

    fn statuses(response: &EngineResponse) -> Vec<RuleStatus> {
        response.rules().iter().map(RuleResponse::status).collect()
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_unbound_policy_denies() {
        let evaluator = CelAdmissionEvaluator::bundled().unwrap();
        let labels = BTreeMap::new();

        let response = evaluator.validate(&data(&[]), &deployment(5), &labels, None);
        assert_eq!(statuses(&response), [RuleStatus::Fail]);
        assert_eq!(response.rules()[0].name(), "max-replicas");
        assert_eq!(response.rules()[0].message(), "at most 3 replicas");

        let response = evaluator.validate(&data(&[]), &deployment(2), &labels, None);
        assert_eq!(statuses(&response), [RuleStatus::Pass]);
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_binding_actions_and_selectors() {
        let evaluator = CelAdmissionEvaluator::bundled().unwrap();
        let bindings = [
            json!({"metadata": {"name": "warn-only"}, "spec": {"policyName": "max-replicas", "validationActions": ["Warn"]}}),
            json!({
                "metadata": {"name": "staging-only"},
                "spec": {
                    "policyName": "max-replicas",
                    "validationActions": ["Deny"],
                    "matchResources": {"namespaceSelector": {"matchLabels": {"env": "staging"}}}
                }
            }),
        ];
        let labels: BTreeMap<String, BTreeMap<String, String>> =
            [("prod".to_string(), [("env".to_string(), "prod".to_string())].into())].into();

        let response = evaluator.validate(&data(&bindings), &deployment(5), &labels, None);
        assert_eq!(statuses(&response), [RuleStatus::Warn]);
        assert_eq!(response.rules()[0].name(), "warn-only");
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_unmatched_and_unmapped_resources() {
        let evaluator = CelAdmissionEvaluator::bundled().unwrap();
        let labels = BTreeMap::new();

        let config_map = Resource::from_value(json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "cm"}})).unwrap();
        assert!(evaluator.validate(&data(&[]), &config_map, &labels, None).is_empty());

        let unknown = Resource::from_value(json!({"apiVersion": "acme.io/v1", "kind": "Widget", "metadata": {"name": "w"}})).unwrap();
        let response = evaluator.validate(&data(&[]), &unknown, &labels, None);
        assert_eq!(statuses(&response), [RuleStatus::Error]);
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_namespace_labels_fetched_from_cluster() {
        let evaluator = CelAdmissionEvaluator::bundled().unwrap();
        let mut cluster = InMemoryCluster::new();
        cluster
            .insert(
                Resource::from_value(json!({
                    "apiVersion": "v1",
                    "kind": "Namespace",
                    "metadata": {"name": "prod", "labels": {"env": "staging"}}
                }))
                .unwrap(),
            )
            .unwrap();
        let bindings = [json!({
            "metadata": {"name": "staging-only"},
            "spec": {"policyName": "max-replicas", "matchResources": {"namespaceSelector": {"matchLabels": {"env": "staging"}}}}
        })];

        let response = evaluator.validate(&data(&bindings), &deployment(5), &BTreeMap::new(), Some(&cluster));
        assert_eq!(statuses(&response), [RuleStatus::Fail]);
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_failure_policy() {
        let evaluator = CelAdmissionEvaluator::bundled().unwrap();
        let mut policy: AdmissionPolicy = serde_json::from_value(json!({
            "metadata": {"name": "broken"},
            "spec": {"validations": [{"expression": "object.spec.missing.field > 1"}]}
        }))
        .unwrap();

        let response = evaluator.validate(&AdmissionPolicyData::new(Arc::new(policy.clone())), &deployment(1), &BTreeMap::new(), None);
        assert_eq!(statuses(&response), [RuleStatus::Error]);

        policy.spec.failure_policy = FailurePolicy::Ignore;
        let response = evaluator.validate(&AdmissionPolicyData::new(Arc::new(policy)), &deployment(1), &BTreeMap::new(), None);
        assert_eq!(statuses(&response), [RuleStatus::Skip]);
    }
}
