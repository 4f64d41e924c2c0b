use super::{Collaborators, EvaluationRequest, ResultCounts};
use crate::Result;
use crate::cel::{AdmissionAttributes, CelEngine, CelPolicyEngine, CelRequest, CelResponse, select_context_provider};
use crate::context::{ContextInputs, PolicyContext, build_policy_context};
use crate::engine::{EngineResponse, OutputSink, PolicyRef};
use crate::patch::{ApplyOptions, apply, convert_patches, decode_patch, join_patches};
use crate::policy::{AdmissionPolicyData, RulePolicy};
use crate::resource::{GroupVersionKind, GroupVersionResource, Resource};
use ohno::app_err;
use std::collections::BTreeMap;
use std::sync::Arc;

const LOG_TARGET: &str = " processor";

const MUTATION_NOTE: &str = "\n\nMutation:\nMutation has been applied successfully.";
const GENERATION_NOTE: &str = "\n\nGenerate:\nGeneration completed successfully.";

/// Where the resource under evaluation sits, computed once per run
#[derive(Debug, Clone)]
struct Target {
    gvk: GroupVersionKind,
    subresource: String,
    namespace_labels: BTreeMap<String, String>,

    /// `namespace/kind/name`, used to label output
    path: String,
}

/// Runs every policy of an [`EvaluationRequest`] through the evaluation phases
///
/// The phases run in a fixed order: mutate, verify images, validate, validating
/// admission policies, CEL policies and generate. The resource produced by each
/// of the first three phases is what the following phases see. Outcomes are
/// tallied in the processor's [`ResultCounts`].
#[derive(Debug)]
pub struct PolicyProcessor {
    request: EvaluationRequest,
    collaborators: Collaborators,
    counts: ResultCounts,
}

impl PolicyProcessor {
    #[must_use]
    pub fn new(request: EvaluationRequest, collaborators: Collaborators) -> Self {
        Self {
            request,
            collaborators,
            counts: ResultCounts::new(),
        }
    }

    #[must_use]
    pub const fn counts(&self) -> &ResultCounts {
        &self.counts
    }

    #[must_use]
    pub fn into_counts(self) -> ResultCounts {
        self.counts
    }

    /// Evaluate every policy, emitting mutated and generated resources to `sink`
    ///
    /// Responses are returned in phase order, with the validating admission
    /// policy responses last.
    ///
    /// # Errors
    ///
    /// Returns an error when a policy context cannot be built, when the image
    /// verification annotation cannot be applied, when the CEL phase cannot map
    /// the resource or evaluate it, or when the sink fails
    pub fn apply_policies_on_resource(&mut self, sink: &mut dyn OutputSink) -> Result<Vec<EngineResponse>> {
        let mut responses = Vec::with_capacity(self.request.policies.len());
        let mut admission_responses = Vec::with_capacity(self.request.admission_policies.len());

        let target = match &self.request.resource {
            Some(resource) => Some(self.prepare(resource)?),
            None => None,
        };
        let mut current = self.request.resource.clone();

        if let (Some(target), Some(resource)) = (&target, current.take()) {
            let mut resource = self.mutate(target, resource, sink, &mut responses)?;
            resource = self.verify_images(target, resource, &mut responses)?;
            resource = self.validate(target, resource, &mut responses)?;
            self.evaluate_admission_policies(&resource, &mut admission_responses);
            current = Some(resource);
        }

        if !self.request.cel_policies.is_empty() {
            self.evaluate_cel_policies(target.as_ref(), current.as_ref(), &mut responses)?;
        }

        if let (Some(target), Some(resource)) = (&target, &current) {
            self.generate(target, resource, sink, &mut responses)?;
        }

        self.counts.add_engine_responses(self.request.audit_warn, &responses);
        responses.extend(admission_responses);
        Ok(responses)
    }

    fn prepare(&self, resource: &Resource) -> Result<Target> {
        let mut gvk = resource.group_version_kind();
        let mut subresource = String::new();
        let namespace = resource.namespace();
        let mut namespace_labels = self.request.namespace_labels.get(namespace).cloned().unwrap_or_default();

        match &self.collaborators.client {
            None => {
                for mapping in &self.request.subresources {
                    if gvk == mapping.subresource.group_version_kind() {
                        gvk = mapping.parent_resource.group_version_kind();
                        mapping.short_name().clone_into(&mut subresource);
                    }
                }
            }
            Some(client) => {
                if namespace_labels.is_empty() && resource.kind() != "Namespace" && !namespace.is_empty() {
                    let namespaces = GroupVersionResource::new("", "v1", "namespaces");
                    let found = client
                        .get_resource(&namespaces, "", namespace)
                        .map_err(|e| app_err!("failed to get the resource's namespace ({e})"))?
                        .ok_or_else(|| app_err!("failed to get the resource's namespace (namespace '{namespace}' not found)"))?;
                    namespace_labels = found.labels();
                }
            }
        }

        log::debug!(target: LOG_TARGET, "Evaluating {gvk} '{}' in namespace '{namespace}'", resource.name());
        Ok(Target {
            gvk,
            subresource,
            namespace_labels,
            path: format!("{namespace}/{}/{}", resource.kind(), resource.name()),
        })
    }

    fn policy_context(&self, target: &Target, policy: &Arc<RulePolicy>, resource: &Resource) -> Result<PolicyContext> {
        let inputs = ContextInputs {
            variables: self.request.variables.as_deref(),
            subresources: &self.request.subresources,
            request_info: self.request.request_info.as_ref(),
            namespace_labels: &target.namespace_labels,
            gvk: &target.gvk,
            subresource: &target.subresource,
            exceptions: &self.request.exceptions,
        };
        build_policy_context(&inputs, policy, resource)
    }

    fn mutate(&mut self, target: &Target, mut resource: Resource, sink: &mut dyn OutputSink, responses: &mut Vec<EngineResponse>) -> Result<Resource> {
        for policy in self.request.policies.iter().filter(|policy| policy.has_mutate()) {
            let context = self.policy_context(target, policy, &resource)?;
            let response = self.collaborators.rule_engine.mutate(&context);
            self.counts.add_mutate_response(&response);

            sink.emit(response.patched_resource(), &response, &target.path, false)
                .map_err(|e| app_err!("failed to print mutated result ({e})"))?;
            sink.note(MUTATION_NOTE)?;

            response.patched_resource().clone_into(&mut resource);
            responses.push(response);
        }
        Ok(resource)
    }

    fn verify_images(&self, target: &Target, mut resource: Resource, responses: &mut Vec<EngineResponse>) -> Result<Resource> {
        for policy in self.request.policies.iter().filter(|policy| policy.has_verify_images()) {
            let context = self.policy_context(target, policy, &resource)?;
            let (mut response, metadata) = self.collaborators.rule_engine.verify_and_patch_images(&context);

            if !metadata.is_empty() {
                let has_annotations = !response.patched_resource().annotations().is_empty();
                let document = join_patches(&convert_patches(&metadata.patches(has_annotations)?)?);
                let patch = decode_patch(&document)?;
                let patched = apply(&response.patched_resource().to_json()?, &patch, &ApplyOptions::lenient())
                    .map_err(|e| app_err!("failed to record verified images of policy '{}' ({e})", policy.name()))?;
                response.set_patched_resource(Resource::from_json(&patched)?);
            }

            response.patched_resource().clone_into(&mut resource);
            responses.push(response);
        }
        Ok(resource)
    }

    fn validate(&self, target: &Target, mut resource: Resource, responses: &mut Vec<EngineResponse>) -> Result<Resource> {
        for policy in self
            .request
            .policies
            .iter()
            .filter(|policy| policy.has_validate_or_verify_image_checks())
        {
            let context = self.policy_context(target, policy, &resource)?;
            let response = self.collaborators.rule_engine.validate(&context);
            response.patched_resource().clone_into(&mut resource);
            responses.push(response);
        }
        Ok(resource)
    }

    fn evaluate_admission_policies(&mut self, resource: &Resource, admission_responses: &mut Vec<EngineResponse>) {
        for policy in &self.request.admission_policies {
            let mut data = AdmissionPolicyData::new(Arc::clone(policy));
            for binding in self
                .request
                .admission_bindings
                .iter()
                .filter(|binding| binding.spec.policy_name == policy.name())
            {
                data.add_binding(Arc::clone(binding));
            }

            let response = self.collaborators.admission_evaluator.validate(
                &data,
                resource,
                &self.request.namespace_labels,
                self.collaborators.client.as_deref(),
            );
            self.counts.add_admission_policy_response(&response);
            admission_responses.push(response);
        }
    }

    fn evaluate_cel_policies(&self, target: Option<&Target>, resource: Option<&Resource>, responses: &mut Vec<EngineResponse>) -> Result<()> {
        let provider = select_context_provider(self.collaborators.client.as_ref(), self.request.context_path.as_deref())?;
        let engine = self.cel_engine(target, resource);

        if let Some(resource) = resource {
            let gvk = resource.group_version_kind();
            let mapping = provider
                .resolve(&gvk.group_kind(), &gvk.version)
                .map_err(|e| app_err!("failed to map gvk to gvr {gvk} ({e})"))?;
            let user_info = self.request.request_info.as_ref().map(|info| info.user_info.clone()).unwrap_or_default();
            let request = CelRequest::admission(
                Arc::clone(&provider),
                AdmissionAttributes::create(resource.clone(), mapping.resource, user_info),
            );
            let response = engine
                .handle(&request)
                .map_err(|e| app_err!("failed to apply validating policies on resource {} ({e})", resource.name()))?;
            responses.extend(wrap_cel_response(response));
        }

        if let Some(payload) = &self.request.json_payload {
            let request = CelRequest::from_json(Arc::clone(&provider), payload.clone());
            responses.extend(wrap_cel_response(engine.handle(&request)?));
        }
        Ok(())
    }

    fn cel_engine(&self, target: Option<&Target>, resource: Option<&Resource>) -> Arc<dyn CelEngine> {
        if let Some(engine) = &self.collaborators.cel_engine {
            return Arc::clone(engine);
        }

        let mut namespace_labels = self.request.namespace_labels.clone();
        if let (Some(target), Some(resource)) = (target, resource)
            && !resource.namespace().is_empty()
            && !target.namespace_labels.is_empty()
        {
            let _ = namespace_labels
                .entry(resource.namespace().to_string())
                .or_insert_with(|| target.namespace_labels.clone());
        }

        Arc::new(CelPolicyEngine::new(
            self.request.cel_policies.clone(),
            self.request.cel_exceptions.clone(),
            namespace_labels,
        ))
    }

    fn generate(&mut self, target: &Target, resource: &Resource, sink: &mut dyn OutputSink, responses: &mut Vec<EngineResponse>) -> Result<()> {
        for policy in self.request.policies.iter().filter(|policy| policy.has_generate()) {
            let context = self.policy_context(target, policy, resource)?;
            let mut response = self.collaborators.rule_engine.apply_background_checks(&context);

            if !response.is_empty() {
                match self
                    .collaborators
                    .generate_handler
                    .apply(&context, &response, &self.request.clone_sources)
                {
                    Ok(rules) => response.set_rules(rules),
                    Err(e) => log::error!(target: LOG_TARGET, "failed to apply generate policy '{}': {e}", policy.name()),
                }

                for generated in response.rules().iter().flat_map(|rule| rule.generated_resources()) {
                    sink.emit(generated, &response, &target.path, true)
                        .map_err(|e| app_err!("failed to print generate result ({e})"))?;
                    sink.note(GENERATION_NOTE)?;
                }
            }

            self.counts.add_generate_response(&response);
            if !response.is_empty() {
                responses.push(response);
            }
        }
        Ok(())
    }
}

fn wrap_cel_response(response: CelResponse) -> impl Iterator<Item = EngineResponse> {
    let CelResponse { resource, policies } = response;
    policies
        .into_iter()
        .map(move |policy| EngineResponse::new(resource.clone(), PolicyRef::Cel(policy.policy)).with_rules(policy.rules))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::InMemoryCluster;
    use crate::engine::{
        BuiltinRuleEngine, GenerateHandler, ImageVerificationMetadata, ImageVerificationStatus, RuleEngine, RuleResponse, RuleStatus,
        RuleType,
    };
    use crate::policy::PolicySet;
    use crate::processor::{Phase, YamlOutput};
    use serde_json::json;

    /// Delegates to the built-in engine, except for canned mutate and verify-images results
    #[derive(Debug, Default)]
    struct StubRuleEngine {
        /// Policy whose mutate rules all end in an engine error
        broken_policy: Option<&'static str>,

        /// Patched resource returned by image verification
        verified: Option<Resource>,
    }

    impl RuleEngine for StubRuleEngine {
        fn mutate(&self, context: &PolicyContext) -> EngineResponse {
            if self.broken_policy == Some(context.policy().name()) {
                let rules = context
                    .policy()
                    .rules()
                    .iter()
                    .map(|rule| RuleResponse::error(&rule.name, RuleType::Mutation, "failed to evaluate preconditions"))
                    .collect();
                return EngineResponse::new(context.new_resource().clone(), PolicyRef::Rule(Arc::clone(context.policy()))).with_rules(rules);
            }
            BuiltinRuleEngine::new().mutate(context)
        }

        fn verify_and_patch_images(&self, context: &PolicyContext) -> (EngineResponse, ImageVerificationMetadata) {
            let Some(verified) = &self.verified else {
                return BuiltinRuleEngine::new().verify_and_patch_images(context);
            };
            let response = EngineResponse::new(context.new_resource().clone(), PolicyRef::Rule(Arc::clone(context.policy())))
                .with_patched_resource(verified.clone())
                .with_rules(vec![RuleResponse::pass("verify", RuleType::ImageVerify, "verified")]);
            let mut metadata = ImageVerificationMetadata::new();
            metadata.add("nginx:1.27", ImageVerificationStatus::Pass);
            (response, metadata)
        }

        fn validate(&self, context: &PolicyContext) -> EngineResponse {
            BuiltinRuleEngine::new().validate(context)
        }

        fn apply_background_checks(&self, context: &PolicyContext) -> EngineResponse {
            BuiltinRuleEngine::new().apply_background_checks(context)
        }
    }

    #[derive(Debug)]
    struct FailingGenerateHandler;

    impl GenerateHandler for FailingGenerateHandler {
        fn apply(&self, _: &PolicyContext, _: &EngineResponse, _: &BTreeMap<String, Resource>) -> Result<Vec<RuleResponse>> {
            Err(app_err!("template store unavailable"))
        }
    }

    fn with_rule_engine(engine: StubRuleEngine) -> Collaborators {
        Collaborators {
            rule_engine: Arc::new(engine),
            ..Collaborators::builtin().unwrap()
        }
    }

    fn resource(value: serde_json::Value) -> Resource {
        Resource::from_value(value).unwrap()
    }

    fn pod() -> Resource {
        resource(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "web", "namespace": "team-a"},
            "spec": {"containers": [{"name": "web", "image": "nginx:1.27"}]}
        }))
    }

    fn run(request: EvaluationRequest, collaborators: Collaborators) -> (Result<Vec<EngineResponse>>, ResultCounts, String) {
        let mut processor = PolicyProcessor::new(request, collaborators);
        let mut sink = YamlOutput::new(Vec::new());
        let responses = processor.apply_policies_on_resource(&mut sink);
        let output = String::from_utf8(sink.into_inner()).unwrap();
        (responses, processor.into_counts(), output)
    }

    #[test]
    fn test_offline_subresource_maps_to_parent() {
        let scale = resource(json!({
            "apiVersion": "autoscaling/v1",
            "kind": "Scale",
            "metadata": {"name": "web", "namespace": "team-a"}
        }));
        let request = EvaluationRequest {
            resource: Some(scale.clone()),
            subresources: vec![
                serde_json::from_value(json!({
                    "subresource": {"name": "deployments/scale", "group": "autoscaling", "version": "v1", "kind": "Scale"},
                    "parentResource": {"name": "deployments", "group": "apps", "version": "v1", "kind": "Deployment"}
                }))
                .unwrap(),
            ],
            ..EvaluationRequest::default()
        };
        let processor = PolicyProcessor::new(request, Collaborators::builtin().unwrap());

        let target = processor.prepare(&scale).unwrap();
        assert_eq!(target.gvk, GroupVersionKind::new("apps", "v1", "Deployment"));
        assert_eq!(target.subresource, "scale");
        assert_eq!(target.path, "team-a/Scale/web");
    }

    #[test]
    fn test_namespace_labels_fetched_from_cluster() {
        let request = EvaluationRequest {
            resource: Some(pod()),
            ..EvaluationRequest::default()
        };

        let empty = Collaborators::builtin().unwrap().with_client(Arc::new(InMemoryCluster::new()));
        let processor = PolicyProcessor::new(request.clone(), empty);
        let err = processor.prepare(&pod()).unwrap_err();
        assert!(err.to_string().contains("failed to get the resource's namespace"));

        let mut cluster = InMemoryCluster::new();
        cluster
            .insert(resource(json!({
                "apiVersion": "v1",
                "kind": "Namespace",
                "metadata": {"name": "team-a", "labels": {"env": "prod"}}
            })))
            .unwrap();
        let processor = PolicyProcessor::new(request, Collaborators::builtin().unwrap().with_client(Arc::new(cluster)));
        let target = processor.prepare(&pod()).unwrap();
        assert_eq!(target.namespace_labels["env"], "prod");
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_json_payload_only_runs_cel() {
        let policies = PolicySet::from_yaml(
            r"
apiVersion: policies.admitctl.io/v1alpha1
kind: ValidatingPolicy
metadata:
  name: check-port
spec:
  evaluation:
    mode: JSON
  validations:
    - expression: object.port < 1024
      message: port must be privileged
",
        )
        .unwrap();
        let request = EvaluationRequest {
            json_payload: Some(resource(json!({"port": 8080}))),
            ..EvaluationRequest::default()
        }
        .with_policies(&policies);

        let (responses, counts, output) = run(request, Collaborators::builtin().unwrap());
        let responses = responses.unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].rules()[0].status(), RuleStatus::Fail);
        assert_eq!(responses[0].rules()[0].message(), "port must be privileged");
        assert_eq!(counts.phase(Phase::Cel).fail, 1);
        assert!(output.is_empty());
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_cel_phase_fails_on_unknown_kind() {
        let policies = PolicySet::from_yaml(
            r"
kind: ValidatingPolicy
metadata:
  name: anything
spec:
  validations:
    - expression: 'true'
",
        )
        .unwrap();
        let widget = resource(json!({"apiVersion": "acme.io/v1", "kind": "Widget", "metadata": {"name": "w"}}));

        let (responses, _, _) = run(EvaluationRequest::new(widget, &policies), Collaborators::builtin().unwrap());
        let err = responses.unwrap_err();
        assert!(err.to_string().contains("failed to map gvk to gvr acme.io/v1, Kind=Widget"));
    }

    #[test]
    fn test_generate_responses_are_emitted() {
        let policies = PolicySet::from_yaml(
            r"
kind: ClusterPolicy
metadata:
  name: default-config
spec:
  rules:
    - name: make-config
      match:
        resources:
          kinds: [Pod]
      generate:
        apiVersion: v1
        kind: ConfigMap
        name: '{{ request.object.metadata.name }}-config'
        namespace: '{{ request.object.metadata.namespace }}'
        data:
          data:
            owner: web
",
        )
        .unwrap();

        let (responses, counts, output) = run(EvaluationRequest::new(pod(), &policies), Collaborators::builtin().unwrap());
        let responses = responses.unwrap();
        assert_eq!(responses.len(), 1);
        let generated = &responses[0].rules()[0].generated_resources()[0];
        assert_eq!(generated.name(), "web-config");
        assert_eq!(generated.namespace(), "team-a");
        assert_eq!(counts.phase(Phase::Generate).pass, 1);
        assert!(output.contains("name: web-config"));
        assert!(output.ends_with("Generation completed successfully."));
    }

    #[test]
    fn test_unrecordable_image_metadata_aborts_run() {
        let policies = PolicySet::from_yaml(
            r"
kind: ClusterPolicy
metadata:
  name: verify-nginx
spec:
  rules:
    - name: verify
      match:
        resources:
          kinds: [Pod]
      verifyImages:
        - imageReferences: ['nginx*']
",
        )
        .unwrap();
        let engine = StubRuleEngine {
            verified: Some(resource(json!({"apiVersion": "v1", "kind": "Pod", "metadata": "x"}))),
            ..StubRuleEngine::default()
        };

        let (responses, _, _) = run(EvaluationRequest::new(pod(), &policies), with_rule_engine(engine));
        let err = responses.unwrap_err();
        assert!(err.to_string().contains("failed to record verified images of policy 'verify-nginx'"));
    }

    #[test]
    fn test_generate_handler_error_is_not_fatal() {
        let policies = PolicySet::from_yaml(
            r"
kind: ClusterPolicy
metadata:
  name: default-config
spec:
  rules:
    - name: make-config
      match:
        resources:
          kinds: [Pod]
      generate:
        apiVersion: v1
        kind: ConfigMap
        name: web-config
        namespace: team-a
        data:
          data:
            owner: web
",
        )
        .unwrap();
        let collaborators = Collaborators {
            generate_handler: Arc::new(FailingGenerateHandler),
            ..Collaborators::builtin().unwrap()
        };

        let (responses, counts, output) = run(EvaluationRequest::new(pod(), &policies), collaborators);
        let responses = responses.unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].policy_name(), "default-config");
        assert_eq!(responses[0].rules()[0].name(), "make-config");
        assert!(responses[0].rules()[0].generated_resources().is_empty());
        assert_eq!(counts.phase(Phase::Generate).total(), 1);
        assert!(output.is_empty());
    }

    #[test]
    fn test_mutate_error_does_not_stop_later_policies() {
        let policies = PolicySet::from_yaml(
            r"
kind: ClusterPolicy
metadata:
  name: broken
spec:
  rules:
    - name: add-owner
      match:
        resources:
          kinds: [Pod]
      mutate:
        patchStrategicMerge:
          metadata:
            labels:
              owner: web
---
kind: ClusterPolicy
metadata:
  name: add-foo
spec:
  rules:
    - name: add-foo
      match:
        resources:
          kinds: [Pod]
      mutate:
        patchStrategicMerge:
          metadata:
            labels:
              foo: bar
",
        )
        .unwrap();
        let engine = StubRuleEngine {
            broken_policy: Some("broken"),
            ..StubRuleEngine::default()
        };

        let (responses, counts, _) = run(EvaluationRequest::new(pod(), &policies), with_rule_engine(engine));
        let responses = responses.unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].rules()[0].status(), RuleStatus::Error);
        assert_eq!(responses[1].resource(), responses[0].patched_resource());
        assert_eq!(responses[1].patched_resource().labels()["foo"], "bar");
        assert!(!responses[1].patched_resource().labels().contains_key("owner"));
        assert_eq!(counts.phase(Phase::Mutate).error, 1);
        assert_eq!(counts.phase(Phase::Mutate).pass, 1);
    }
}
