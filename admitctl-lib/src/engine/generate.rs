use super::{EngineResponse, GenerateHandler, RuleResponse, RuleStatus, RuleType};
use crate::Result;
use crate::context::{PolicyContext, substitute_text, substitute_variables};
use crate::policy::Generation;
use crate::resource::Resource;
use ohno::{app_err, bail};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const LOG_TARGET: &str = "  generate";

/// Metadata fields that belong to the source of a clone and not to the copy
const SERVER_METADATA: &[&str] = &["uid", "resourceVersion", "creationTimestamp", "generation", "managedFields", "ownerReferences"];

/// The built-in [`GenerateHandler`]
///
/// `data` rules render their template after variable substitution. `clone`
/// rules copy the source resource supplied for the rule.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateGenerateHandler;

impl TemplateGenerateHandler {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl GenerateHandler for TemplateGenerateHandler {
    fn apply(&self, context: &PolicyContext, response: &EngineResponse, clone_sources: &BTreeMap<String, Resource>) -> Result<Vec<RuleResponse>> {
        let mut rules = Vec::with_capacity(response.rules().len());
        for outcome in response.rules() {
            let generation = context.policy().rule(outcome.name()).and_then(|rule| rule.generate.as_ref());
            match generation {
                Some(generation) if outcome.status() == RuleStatus::Pass && outcome.rule_type() == RuleType::Generation => {
                    match render(context, outcome.name(), generation, clone_sources) {
                        Ok(generated) => {
                            log::debug!(target: LOG_TARGET, "Rule '{}' generated {}/{}", outcome.name(), generated.kind(), generated.name());
                            let message = format!("created resource {}/{}/{}", generated.namespace(), generated.kind(), generated.name());
                            rules.push(RuleResponse::pass(outcome.name(), RuleType::Generation, message).with_generated_resources(vec![generated]));
                        }
                        Err(e) => {
                            log::debug!(target: LOG_TARGET, "Rule '{}' failed to generate: {e}", outcome.name());
                            rules.push(RuleResponse::fail(outcome.name(), RuleType::Generation, e.to_string()));
                        }
                    }
                }
                _ => rules.push(outcome.clone()),
            }
        }
        Ok(rules)
    }
}

fn render(context: &PolicyContext, rule_name: &str, generation: &Generation, clone_sources: &BTreeMap<String, Resource>) -> Result<Resource> {
    let json_context = context.json_context();
    let mut object = if let Some(data) = &generation.data {
        match substitute_variables(data, json_context)? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => bail!("generate rule '{rule_name}' data must be an object, found '{other}'"),
        }
    } else if generation.clone.is_some() {
        let source = clone_sources
            .get(rule_name)
            .ok_or_else(|| app_err!("no clone source resource provided for generate rule '{rule_name}'"))?;
        let mut object = source.object().clone();
        if let Some(Value::Object(metadata)) = object.get_mut("metadata") {
            for field in SERVER_METADATA {
                let _ = metadata.shift_remove(*field);
            }
        }
        object
    } else {
        bail!("generate rule '{rule_name}' has neither data nor clone");
    };

    for (field, template) in [("apiVersion", &generation.api_version), ("kind", &generation.kind)] {
        if !template.is_empty() {
            let _ = object.insert(field.to_string(), Value::String(substitute_text(template, json_context)?));
        }
    }

    let mut generated = Resource::new(object);
    generated.set_metadata("name", Value::String(substitute_text(&generation.name, json_context)?));
    let namespace = substitute_text(&generation.namespace, json_context)?;
    if !namespace.is_empty() {
        generated.set_metadata("namespace", Value::String(namespace));
    }
    Ok(generated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextInputs, build_policy_context};
    use crate::engine::{BuiltinRuleEngine, RuleEngine};
    use crate::policy::RulePolicy;
    use crate::resource::GroupVersionKind;
    use serde_json::json;
    use std::sync::Arc;

    fn namespace() -> Resource {
        Resource::from_value(json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "team-a"}})).unwrap()
    }

    fn context(policy: &Arc<RulePolicy>) -> PolicyContext {
        let labels = BTreeMap::new();
        let gvk = GroupVersionKind::new("", "v1", "Namespace");
        let inputs = ContextInputs {
            variables: None,
            subresources: &[],
            request_info: None,
            namespace_labels: &labels,
            gvk: &gvk,
            subresource: "",
            exceptions: &[],
        };
        build_policy_context(&inputs, policy, &namespace()).unwrap()
    }

    fn generate(policy: serde_json::Value, clone_sources: &BTreeMap<String, Resource>) -> Result<Vec<RuleResponse>> {
        let policy: Arc<RulePolicy> = Arc::new(serde_json::from_value(policy).unwrap());
        let context = context(&policy);
        let response = BuiltinRuleEngine.apply_background_checks(&context);
        TemplateGenerateHandler.apply(&context, &response, clone_sources)
    }

    #[test]
    fn test_data_rule_renders_template() {
        let rules = generate(
            json!({
                "metadata": {"name": "default-quota"},
                "spec": {"rules": [{
                    "name": "quota",
                    "match": {"resources": {"kinds": ["Namespace"]}},
                    "generate": {
                        "apiVersion": "v1",
                        "kind": "ResourceQuota",
                        "name": "quota",
                        "namespace": "{{ request.object.metadata.name }}",
                        "data": {"spec": {"hard": {"pods": "10"}}}
                    }
                }]}
            }),
            &BTreeMap::new(),
        )
        .unwrap();

        assert_eq!(rules.len(), 1);
        let generated = &rules[0].generated_resources()[0];
        assert_eq!(generated.kind(), "ResourceQuota");
        assert_eq!(generated.namespace(), "team-a");
        assert_eq!(generated.pointer("/spec/hard/pods").unwrap(), "10");
        assert_eq!(rules[0].message(), "created resource team-a/ResourceQuota/quota");
    }

    #[test]
    fn test_clone_rule_copies_source() {
        let policy = json!({
            "metadata": {"name": "copy-secret"},
            "spec": {"rules": [{
                "name": "copy",
                "match": {"resources": {"kinds": ["Namespace"]}},
                "generate": {
                    "apiVersion": "v1",
                    "kind": "Secret",
                    "name": "regcred",
                    "namespace": "{{ request.object.metadata.name }}",
                    "clone": {"namespace": "default", "name": "regcred"}
                }
            }]}
        });
        let source = Resource::from_value(json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {"name": "regcred", "namespace": "default", "uid": "1234", "resourceVersion": "9"},
            "data": {"token": "c2VjcmV0"}
        }))
        .unwrap();

        let sources: BTreeMap<String, Resource> = [("copy".to_string(), source)].into();
        let rules = generate(policy, &sources).unwrap();
        let generated = &rules[0].generated_resources()[0];
        assert_eq!(generated.namespace(), "team-a");
        assert_eq!(generated.pointer("/data/token").unwrap(), "c2VjcmV0");
        assert!(generated.pointer("/metadata/uid").is_none());
        assert!(generated.pointer("/metadata/resourceVersion").is_none());
    }

    #[test]
    fn test_failed_rule_does_not_discard_other_rules() {
        let rules = generate(
            json!({
                "metadata": {"name": "namespace-defaults"},
                "spec": {"rules": [
                    {
                        "name": "quota",
                        "match": {"resources": {"kinds": ["Namespace"]}},
                        "generate": {
                            "apiVersion": "v1",
                            "kind": "ResourceQuota",
                            "name": "quota",
                            "namespace": "{{ request.object.metadata.name }}",
                            "data": {"spec": {"hard": {"pods": "10"}}}
                        }
                    },
                    {
                        "name": "copy",
                        "match": {"resources": {"kinds": ["Namespace"]}},
                        "generate": {
                            "apiVersion": "v1",
                            "kind": "Secret",
                            "name": "regcred",
                            "namespace": "{{ request.object.metadata.name }}",
                            "clone": {"namespace": "default", "name": "regcred"}
                        }
                    }
                ]}
            }),
            &BTreeMap::new(),
        )
        .unwrap();

        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].status(), RuleStatus::Pass);
        assert_eq!(rules[0].generated_resources().len(), 1);

        assert_eq!(rules[1].name(), "copy");
        assert_eq!(rules[1].status(), RuleStatus::Fail);
        assert_eq!(rules[1].rule_type(), RuleType::Generation);
        assert!(rules[1].message().contains("no clone source resource provided for generate rule 'copy'"));
        assert!(rules[1].generated_resources().is_empty());
    }
}
