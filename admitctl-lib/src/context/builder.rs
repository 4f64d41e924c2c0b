use super::{JsonContext, OBJECT_BINDING, OLD_OBJECT_BINDING, Operation, PolicyContext, RequestInfo, infer_operation};
use crate::Result;
use crate::policy::{PolicyException, RulePolicy};
use crate::resource::{GroupVersionKind, Resource};
use crate::variables::{Subresource, VariableResolver, policy_kinds};
use ohno::{app_err, bail};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

const LOG_TARGET: &str = "   context";

/// Inputs shared by every context built for one evaluation run
#[derive(Debug, Clone, Copy)]
pub struct ContextInputs<'a> {
    pub variables: Option<&'a dyn VariableResolver>,
    pub subresources: &'a [Subresource],
    pub request_info: Option<&'a RequestInfo>,
    pub namespace_labels: &'a BTreeMap<String, String>,
    pub gvk: &'a GroupVersionKind,
    pub subresource: &'a str,
    pub exceptions: &'a [Arc<PolicyException>],
}

/// Build the evaluation context for `policy` applied to `resource`
///
/// Variables are resolved and injected into the JSON context, after which the
/// new and old resources are read back from it so that bindings such as
/// `request.object.metadata.name` take effect on the resources themselves.
pub fn build_policy_context(inputs: &ContextInputs<'_>, policy: &Arc<RulePolicy>, resource: &Resource) -> Result<PolicyContext> {
    let bindings = match inputs.variables {
        Some(resolver) => {
            let kinds = policy_kinds(policy, inputs.subresources);
            resolver
                .compute_variables(policy, resource.name(), resource.kind(), &kinds)
                .map_err(|e| {
                    app_err!(
                        "policy `{}` have variables. pass the values for the variables for resource `{}` using set/values_file flag ({e})",
                        policy.name(),
                        resource.name()
                    )
                })?
        }
        None => BTreeMap::new(),
    };

    let operation = infer_operation(&bindings);

    let mut json_context = JsonContext::new();
    let mut old_resource = None;
    match operation {
        Operation::Create => json_context.add_resource(resource)?,
        Operation::Update => {
            json_context.add_resource(resource)?;
            let previous = resource.clone();
            json_context.add_old_resource(&previous)?;
            old_resource = Some(previous);
        }
        Operation::Delete => {
            json_context.add_old_resource(resource)?;
            old_resource = Some(resource.clone());
        }
    }
    json_context.add_operation(operation)?;

    let request_info = inputs.request_info.cloned().unwrap_or_default();
    json_context.add_user_info(&request_info)?;

    for (key, value) in &bindings {
        json_context
            .add_variable(key, value.clone())
            .map_err(|e| app_err!("failed to add variable {key}={value} to the context ({e})"))?;
    }

    // A deleted resource has no new state; the input stands in for it.
    let new_resource = match operation {
        Operation::Delete => resource.clone(),
        Operation::Create | Operation::Update => rederive(&json_context, OBJECT_BINDING)?,
    };
    if old_resource.is_some() {
        old_resource = Some(rederive(&json_context, OLD_OBJECT_BINDING)?);
    }

    log::debug!(target: LOG_TARGET, "Built {operation} context for policy '{}' and resource '{}'", policy.name(), resource.name());

    Ok(PolicyContext {
        policy: Arc::clone(policy),
        new_resource,
        old_resource,
        operation,
        request_info,
        namespace_labels: inputs.namespace_labels.clone(),
        gvk: inputs.gvk.clone(),
        subresource: inputs.subresource.to_string(),
        json_context,
        exceptions: inputs
            .exceptions
            .iter()
            .filter(|exception| exception.names_policy(policy.name()))
            .map(Arc::clone)
            .collect(),
    })
}

fn rederive(json_context: &JsonContext, binding: &str) -> Result<Resource> {
    match json_context.query(binding)? {
        None => Ok(Resource::default()),
        Some(Value::Object(object)) => Ok(Resource::new(object.clone())),
        Some(_) => bail!("the object retrieved from the json context is not valid"),
    }
}
