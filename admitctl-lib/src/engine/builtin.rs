use super::images::{container_images, is_digest_pinned};
use super::{
    EngineResponse, ImageVerificationMetadata, ImageVerificationStatus, PolicyRef, RuleEngine, RuleResponse, RuleType, VERIFY_IMAGES_ANNOTATION,
};
use crate::Result;
use crate::cel::{CompiledExpression, to_cel_value};
use crate::context::{JsonContext, PolicyContext, substitute_text, substitute_variables};
use crate::patch::{ApplyOptions, Patch, apply_to_value};
use crate::policy::{ImageVerification, Mutation, Rule, Validation, wildcard_match};
use crate::resource::Resource;
use cel_interpreter::{Context, Value as CelValue};
use ohno::IntoAppError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

const LOG_TARGET: &str = "    engine";

/// The built-in [`RuleEngine`]
///
/// Mutations apply `patchStrategicMerge` as a JSON merge patch followed by
/// `patchesJson6902`, both after variable substitution. Validations evaluate CEL
/// expressions against `object`, `oldObject` and `request`. Images are
/// considered verified when pinned by digest.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinRuleEngine;

impl BuiltinRuleEngine {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl RuleEngine for BuiltinRuleEngine {
    fn mutate(&self, context: &PolicyContext) -> EngineResponse {
        let mut json_context = context.json_context().clone();
        let mut current = context.new_resource().clone();
        let mut rules = Vec::new();

        for rule in context.policy().rules() {
            let Some(mutation) = &rule.mutate else {
                continue;
            };
            match screen(context, rule, RuleType::Mutation) {
                Screening::Unmatched => continue,
                Screening::Excepted(skipped) => {
                    rules.push(skipped);
                    continue;
                }
                Screening::Evaluate => {}
            }

            let applied = apply_mutation(mutation, &current, &json_context)
                .and_then(|patched| json_context.add_resource(&patched).map(|()| patched));
            match applied {
                Ok(patched) => {
                    current = patched;
                    rules.push(RuleResponse::pass(&rule.name, RuleType::Mutation, "mutated resource"));
                }
                Err(e) => {
                    log::debug!(target: LOG_TARGET, "Rule '{}' failed to mutate: {e}", rule.name);
                    rules.push(RuleResponse::error(&rule.name, RuleType::Mutation, format!("failed to mutate resource: {e}")));
                }
            }
        }

        response(context).with_patched_resource(current).with_rules(rules)
    }

    fn verify_and_patch_images(&self, context: &PolicyContext) -> (EngineResponse, ImageVerificationMetadata) {
        let mut metadata = ImageVerificationMetadata::new();
        let mut rules = Vec::new();
        let images = container_images(context.new_resource());

        for rule in context.policy().rules().iter().filter(|rule| rule.has_verify_images()) {
            match screen(context, rule, RuleType::ImageVerify) {
                Screening::Unmatched => continue,
                Screening::Excepted(skipped) => {
                    rules.push(skipped);
                    continue;
                }
                Screening::Evaluate => {}
            }

            let mut matched = Vec::new();
            let mut unpinned = Vec::new();
            for image in images.iter().filter(|image| rule.verify_images.iter().any(|v| references(v, image))) {
                let requires_digest = rule.verify_images.iter().any(|v| v.verify_digest && references(v, image));
                let status = if is_digest_pinned(image) {
                    ImageVerificationStatus::Pass
                } else if requires_digest {
                    unpinned.push(image.as_str());
                    ImageVerificationStatus::Fail
                } else {
                    ImageVerificationStatus::Skip
                };
                metadata.add(image.as_str(), status);
                matched.push(image.as_str());
            }

            let outcome = if matched.is_empty() {
                RuleResponse::skip(&rule.name, RuleType::ImageVerify, "no images matched the rule")
            } else if unpinned.is_empty() {
                RuleResponse::pass(&rule.name, RuleType::ImageVerify, format!("verified {}", matched.join(", ")))
            } else {
                RuleResponse::fail(&rule.name, RuleType::ImageVerify, format!("missing digest for {}", unpinned.join(", ")))
            };
            rules.push(outcome);
        }

        (response(context).with_rules(rules), metadata)
    }

    fn validate(&self, context: &PolicyContext) -> EngineResponse {
        let mut rules = Vec::new();
        let mut activation = None;

        for rule in context.policy().rules() {
            if let Some(validation) = &rule.validate {
                match screen(context, rule, RuleType::Validation) {
                    Screening::Unmatched => {}
                    Screening::Excepted(skipped) => rules.push(skipped),
                    Screening::Evaluate => {
                        let activation = activation.get_or_insert_with(|| cel_activation(context));
                        rules.push(validate_rule(rule, validation, context.json_context(), activation));
                    }
                }
            }

            if rule.has_verify_image_checks() {
                match screen(context, rule, RuleType::ImageVerify) {
                    Screening::Unmatched => {}
                    Screening::Excepted(skipped) => rules.push(skipped),
                    Screening::Evaluate => rules.push(check_verified_images(rule, context.new_resource())),
                }
            }
        }

        response(context).with_rules(rules)
    }

    fn apply_background_checks(&self, context: &PolicyContext) -> EngineResponse {
        let mut rules = Vec::new();
        for rule in context.policy().rules().iter().filter(|rule| rule.has_generate()) {
            match screen(context, rule, RuleType::Generation) {
                Screening::Unmatched => {}
                Screening::Excepted(skipped) => rules.push(skipped),
                Screening::Evaluate => rules.push(RuleResponse::pass(&rule.name, RuleType::Generation, "generate rule matched")),
            }
        }
        response(context).with_rules(rules)
    }
}

fn response(context: &PolicyContext) -> EngineResponse {
    EngineResponse::new(context.new_resource().clone(), PolicyRef::Rule(Arc::clone(context.policy())))
}

enum Screening {
    Unmatched,
    Excepted(RuleResponse),
    Evaluate,
}

/// Decide whether a rule is evaluated, suppressed by an exception or ignored
fn screen(context: &PolicyContext, rule: &Rule, rule_type: RuleType) -> Screening {
    if !rule.matches(context.match_resource(), context.gvk(), context.subresource(), context.namespace_labels()) {
        return Screening::Unmatched;
    }
    match context.exception_for(&rule.name) {
        Some(exception) => Screening::Excepted(RuleResponse::skip(
            &rule.name,
            rule_type,
            format!("rule is skipped due to policy exception {}", exception.name()),
        )),
        None => Screening::Evaluate,
    }
}

fn apply_mutation(mutation: &Mutation, current: &Resource, json_context: &JsonContext) -> Result<Resource> {
    let mut document = current.to_value();

    if let Some(overlay) = &mutation.patch_strategic_merge {
        let overlay = substitute_variables(overlay, json_context)?;
        json_patch::merge(&mut document, &overlay);
    }

    if !mutation.patches_json6902.is_empty() {
        let encoded = serde_json::to_value(&mutation.patches_json6902).into_app_err("encoding JSON patches")?;
        let patch: Patch = serde_json::from_value(substitute_variables(&encoded, json_context)?).into_app_err("decoding JSON patches")?;
        apply_to_value(&mut document, &patch, &ApplyOptions::default())?;
    }

    Resource::from_value(document)
}

fn cel_activation(context: &PolicyContext) -> Context<'static> {
    let mut activation = Context::default();
    activation.add_variable_from_value("object", to_cel_value(&context.new_resource().to_value()));
    activation.add_variable_from_value(
        "oldObject",
        context.old_resource().map_or(CelValue::Null, |old| to_cel_value(&old.to_value())),
    );
    let request = context.json_context().query("request").ok().flatten().cloned().unwrap_or(Value::Null);
    activation.add_variable_from_value("request", to_cel_value(&request));
    activation
}

fn validate_rule(rule: &Rule, validation: &Validation, json_context: &JsonContext, activation: &Context<'_>) -> RuleResponse {
    let message = match substitute_text(&validation.message, json_context) {
        Ok(message) => message,
        Err(e) => {
            return RuleResponse::error(&rule.name, RuleType::Validation, format!("failed to substitute variables in the message: {e}"));
        }
    };

    let expressions = validation.cel.as_ref().map(|cel| cel.expressions.as_slice()).unwrap_or_default();
    for (index, check) in expressions.iter().enumerate() {
        let outcome = CompiledExpression::compile(format!("{}[{index}]", rule.name), &check.expression)
            .and_then(|expression| expression.evaluate_bool(activation));
        match outcome {
            Ok(true) => {}
            Ok(false) => {
                let reason = check.message.clone().unwrap_or_else(|| {
                    if message.is_empty() {
                        format!("expression '{}' evaluated to false", check.expression)
                    } else {
                        message.clone()
                    }
                });
                return RuleResponse::fail(&rule.name, RuleType::Validation, format!("validation error: {reason}"));
            }
            Err(e) => return RuleResponse::error(&rule.name, RuleType::Validation, e.to_string()),
        }
    }

    RuleResponse::pass(&rule.name, RuleType::Validation, format!("validation rule '{}' passed.", rule.name))
}

/// Check that images were pinned and recorded as verified by the verify-images phase
fn check_verified_images(rule: &Rule, resource: &Resource) -> RuleResponse {
    let recorded: BTreeMap<String, String> = resource
        .annotations()
        .get(VERIFY_IMAGES_ANNOTATION)
        .and_then(|text| serde_json::from_str(text).ok())
        .unwrap_or_default();

    let mut problems = Vec::new();
    let mut checked = 0_usize;
    for image in container_images(resource) {
        for verification in rule.verify_images.iter().filter(|v| references(v, &image)) {
            checked += 1;
            if verification.verify_digest && !is_digest_pinned(&image) {
                problems.push(format!("missing digest for {image}"));
            } else if verification.required && recorded.get(&image).is_none_or(|status| status != "pass") {
                problems.push(format!("image {image} is not verified"));
            }
        }
    }

    if checked == 0 {
        RuleResponse::skip(&rule.name, RuleType::ImageVerify, "no images matched the rule")
    } else if problems.is_empty() {
        RuleResponse::pass(&rule.name, RuleType::ImageVerify, "image verification checks passed")
    } else {
        problems.dedup();
        RuleResponse::fail(&rule.name, RuleType::ImageVerify, problems.join("; "))
    }
}

fn references(verification: &ImageVerification, image: &str) -> bool {
    verification.image_references.iter().any(|pattern| wildcard_match(pattern, image))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextInputs, build_policy_context};
    use crate::engine::RuleStatus;
    use crate::policy::{PolicyException, RulePolicy};
    use crate::resource::GroupVersionKind;
    use serde_json::json;

    fn policy(value: Value) -> Arc<RulePolicy> {
        Arc::new(serde_json::from_value(value).unwrap())
    }

    fn pod(image: &str) -> Resource {
        Resource::from_value(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "web", "namespace": "default"},
            "spec": {"containers": [{"name": "app", "image": image}]}
        }))
        .unwrap()
    }

    fn context_with(policy: &Arc<RulePolicy>, resource: &Resource, exceptions: &[Arc<PolicyException>]) -> PolicyContext {
        let labels = BTreeMap::new();
        let gvk = GroupVersionKind::new("", "v1", "Pod");
        let inputs = ContextInputs {
            variables: None,
            subresources: &[],
            request_info: None,
            namespace_labels: &labels,
            gvk: &gvk,
            subresource: "",
            exceptions,
        };
        build_policy_context(&inputs, policy, resource).unwrap()
    }

    fn context(policy: &Arc<RulePolicy>, resource: &Resource) -> PolicyContext {
        context_with(policy, resource, &[])
    }

    fn statuses(response: &EngineResponse) -> Vec<RuleStatus> {
        response.rules().iter().map(RuleResponse::status).collect()
    }

    #[test]
    fn test_mutate_merges_and_patches() {
        let policy = policy(json!({
            "metadata": {"name": "add-labels"},
            "spec": {"rules": [
                {
                    "name": "label",
                    "match": {"resources": {"kinds": ["Pod"]}},
                    "mutate": {"patchStrategicMerge": {"metadata": {"labels": {"owner": "{{ request.object.metadata.name }}"}}}}
                },
                {
                    "name": "annotate",
                    "match": {"resources": {"kinds": ["Pod"]}},
                    "mutate": {"patchesJson6902": [{"op": "add", "path": "/metadata/annotations", "value": {"seen-owner": "{{ request.object.metadata.labels.owner }}"}}]}
                }
            ]}
        }));

        let response = BuiltinRuleEngine.mutate(&context(&policy, &pod("nginx")));
        assert_eq!(statuses(&response), [RuleStatus::Pass, RuleStatus::Pass]);
        assert_eq!(response.patched_resource().labels()["owner"], "web");
        assert_eq!(response.patched_resource().annotations()["seen-owner"], "web");
        assert!(response.resource().labels().is_empty());
    }

    #[test]
    fn test_mutate_error_stays_in_response() {
        let policy = policy(json!({
            "metadata": {"name": "broken"},
            "spec": {"rules": [{
                "name": "replace-missing",
                "match": {"resources": {"kinds": ["Pod"]}},
                "mutate": {"patchesJson6902": [{"op": "replace", "path": "/spec/missing", "value": 1}]}
            }]}
        }));

        let resource = pod("nginx");
        let response = BuiltinRuleEngine.mutate(&context(&policy, &resource));
        assert_eq!(statuses(&response), [RuleStatus::Error]);
        assert_eq!(response.patched_resource(), &resource);
    }

    #[test]
    fn test_unmatched_rules_produce_no_outcome() {
        let policy = policy(json!({
            "metadata": {"name": "deployments-only"},
            "spec": {"rules": [{
                "name": "label",
                "match": {"resources": {"kinds": ["Deployment"]}},
                "mutate": {"patchStrategicMerge": {"metadata": {"labels": {"a": "b"}}}}
            }]}
        }));
        assert!(BuiltinRuleEngine.mutate(&context(&policy, &pod("nginx"))).is_empty());
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_validate_with_cel() {
        let policy = policy(json!({
            "metadata": {"name": "no-latest"},
            "spec": {"rules": [{
                "name": "check-tag",
                "match": {"resources": {"kinds": ["Pod"]}},
                "validate": {
                    "message": "images of {{ request.object.metadata.name }} must not use latest",
                    "cel": {"expressions": [{"expression": "object.spec.containers.all(c, !c.image.endsWith(':latest'))"}]}
                }
            }]}
        }));

        let passed = BuiltinRuleEngine.validate(&context(&policy, &pod("nginx:1.27")));
        assert_eq!(statuses(&passed), [RuleStatus::Pass]);

        let failed = BuiltinRuleEngine.validate(&context(&policy, &pod("nginx:latest")));
        assert_eq!(statuses(&failed), [RuleStatus::Fail]);
        assert_eq!(failed.rules()[0].message(), "validation error: images of web must not use latest");
    }

    #[test]
    fn test_exception_skips_rule() {
        let policy = policy(json!({
            "metadata": {"name": "require-team"},
            "spec": {"rules": [{
                "name": "check-team",
                "match": {"resources": {"kinds": ["Pod"]}},
                "validate": {"message": "team label required"}
            }]}
        }));
        let exception: PolicyException = serde_json::from_value(json!({
            "metadata": {"name": "allow-web"},
            "spec": {
                "exceptions": [{"policyName": "require-team", "ruleNames": ["check-*"]}],
                "match": {"resources": {"kinds": ["Pod"], "names": ["web"]}}
            }
        }))
        .unwrap();

        let response = BuiltinRuleEngine.validate(&context_with(&policy, &pod("nginx"), &[Arc::new(exception)]));
        assert_eq!(statuses(&response), [RuleStatus::Skip]);
        assert_eq!(response.rules()[0].message(), "rule is skipped due to policy exception allow-web");
    }

    #[test]
    fn test_verify_images_records_metadata() {
        let policy = policy(json!({
            "metadata": {"name": "pinned"},
            "spec": {"rules": [{
                "name": "digest",
                "match": {"resources": {"kinds": ["Pod"]}},
                "verifyImages": [{"imageReferences": ["ghcr.io/acme/*"]}]
            }]}
        }));

        let (response, metadata) = BuiltinRuleEngine.verify_and_patch_images(&context(&policy, &pod("ghcr.io/acme/app@sha256:abc")));
        assert_eq!(statuses(&response), [RuleStatus::Pass]);
        assert_eq!(metadata.get("ghcr.io/acme/app@sha256:abc"), Some(ImageVerificationStatus::Pass));

        let (response, metadata) = BuiltinRuleEngine.verify_and_patch_images(&context(&policy, &pod("ghcr.io/acme/app:1.0")));
        assert_eq!(statuses(&response), [RuleStatus::Fail]);
        assert_eq!(metadata.get("ghcr.io/acme/app:1.0"), Some(ImageVerificationStatus::Fail));

        let (response, metadata) = BuiltinRuleEngine.verify_and_patch_images(&context(&policy, &pod("nginx")));
        assert_eq!(statuses(&response), [RuleStatus::Skip]);
        assert!(metadata.is_empty());
    }

    #[test]
    fn test_validate_checks_recorded_verification() {
        let policy = policy(json!({
            "metadata": {"name": "pinned"},
            "spec": {"rules": [{
                "name": "digest",
                "match": {"resources": {"kinds": ["Pod"]}},
                "verifyImages": [{"imageReferences": ["ghcr.io/acme/*"]}]
            }]}
        }));
        let image = "ghcr.io/acme/app@sha256:abc";

        let unrecorded = BuiltinRuleEngine.validate(&context(&policy, &pod(image)));
        assert_eq!(statuses(&unrecorded), [RuleStatus::Fail]);

        let mut recorded = pod(image);
        recorded.set_metadata("annotations", json!({"admitctl.io/verify-images": format!(r#"{{"{image}":"pass"}}"#)}));
        let verified = BuiltinRuleEngine.validate(&context(&policy, &recorded));
        assert_eq!(statuses(&verified), [RuleStatus::Pass]);
    }

    #[test]
    fn test_background_checks_report_matching_generate_rules() {
        let policy = policy(json!({
            "metadata": {"name": "gen"},
            "spec": {"rules": [{
                "name": "make-cm",
                "match": {"resources": {"kinds": ["Pod"]}},
                "generate": {"apiVersion": "v1", "kind": "ConfigMap", "name": "cm", "namespace": "default", "data": {}}
            }]}
        }));
        let response = BuiltinRuleEngine.apply_background_checks(&context(&policy, &pod("nginx")));
        assert_eq!(statuses(&response), [RuleStatus::Pass]);
        assert_eq!(response.rules()[0].rule_type(), RuleType::Generation);
    }
}
