use super::{CelContextProvider, cel_map, cel_string, to_cel_value};
use crate::context::{Operation, UserInfo};
use crate::resource::{GroupVersionKind, GroupVersionResource, Resource};
use cel_interpreter::{Context, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// The attributes of a simulated admission request
#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionAttributes {
    pub gvk: GroupVersionKind,
    pub gvr: GroupVersionResource,
    pub subresource: String,
    pub name: String,
    pub namespace: String,
    pub operation: Operation,
    pub user_info: UserInfo,
    pub object: Resource,
    pub old_object: Option<Resource>,
    pub dry_run: bool,
}

impl AdmissionAttributes {
    /// A create request for `object`
    #[must_use]
    pub fn create(object: Resource, gvr: GroupVersionResource, user_info: UserInfo) -> Self {
        Self {
            gvk: object.group_version_kind(),
            gvr,
            subresource: String::new(),
            name: object.name().to_string(),
            namespace: object.namespace().to_string(),
            operation: Operation::Create,
            user_info,
            object,
            old_object: None,
            dry_run: false,
        }
    }

    /// The CEL bindings for this request: `object`, `oldObject`, `request` and,
    /// for namespaced resources, `namespaceObject`
    #[must_use]
    pub fn activation(&self, namespace_labels: Option<&BTreeMap<String, String>>) -> Context<'static> {
        let mut context = Context::default();
        context.add_variable_from_value("object", to_cel_value(&self.object.to_value()));
        context.add_variable_from_value(
            "oldObject",
            self.old_object.as_ref().map_or(Value::Null, |old| to_cel_value(&old.to_value())),
        );
        context.add_variable_from_value("request", self.request_value());

        if !self.namespace.is_empty() {
            let labels = namespace_labels
                .into_iter()
                .flatten()
                .map(|(key, value)| (key.clone(), cel_string(value.as_str())));
            context.add_variable_from_value(
                "namespaceObject",
                cel_map([("metadata", cel_map([("name", cel_string(&self.namespace)), ("labels", cel_map(labels))]))]),
            );
        }
        context
    }

    fn request_value(&self) -> Value {
        let groups = self.user_info.groups.iter().map(|g| cel_string(g.as_str())).collect();
        cel_map([
            (
                "kind",
                cel_map([
                    ("group", cel_string(&self.gvk.group)),
                    ("version", cel_string(&self.gvk.version)),
                    ("kind", cel_string(&self.gvk.kind)),
                ]),
            ),
            (
                "resource",
                cel_map([
                    ("group", cel_string(&self.gvr.group)),
                    ("version", cel_string(&self.gvr.version)),
                    ("resource", cel_string(&self.gvr.resource)),
                ]),
            ),
            ("subResource", cel_string(&self.subresource)),
            ("name", cel_string(&self.name)),
            ("namespace", cel_string(&self.namespace)),
            ("operation", cel_string(self.operation.as_str())),
            (
                "userInfo",
                cel_map([
                    ("username", cel_string(&self.user_info.username)),
                    ("uid", cel_string(&self.user_info.uid)),
                    ("groups", Value::List(Arc::new(groups))),
                ]),
            ),
            ("dryRun", Value::Bool(self.dry_run)),
        ])
    }
}

/// What a CEL policy is evaluated against
#[derive(Debug, Clone, PartialEq)]
pub enum RequestPayload {
    Admission(AdmissionAttributes),
    Json(Resource),
}

/// A request handed to a [`CelEngine`](super::CelEngine)
#[derive(Debug, Clone)]
pub struct CelRequest {
    provider: Arc<dyn CelContextProvider>,
    payload: RequestPayload,
}

impl CelRequest {
    #[must_use]
    pub fn admission(provider: Arc<dyn CelContextProvider>, attributes: AdmissionAttributes) -> Self {
        Self {
            provider,
            payload: RequestPayload::Admission(attributes),
        }
    }

    /// A request evaluating JSON-mode policies against an arbitrary payload
    #[must_use]
    pub fn from_json(provider: Arc<dyn CelContextProvider>, payload: Resource) -> Self {
        Self {
            provider,
            payload: RequestPayload::Json(payload),
        }
    }

    #[must_use]
    pub const fn provider(&self) -> &Arc<dyn CelContextProvider> {
        &self.provider
    }

    #[must_use]
    pub const fn payload(&self) -> &RequestPayload {
        &self.payload
    }

    /// The resource the request carries
    #[must_use]
    pub const fn resource(&self) -> &Resource {
        match &self.payload {
            RequestPayload::Admission(attributes) => &attributes.object,
            RequestPayload::Json(payload) => payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cel::CompiledExpression;
    use serde_json::json;

    fn attributes() -> AdmissionAttributes {
        let object = Resource::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "prod"}
        }))
        .unwrap();
        let user = UserInfo {
            username: "jane".into(),
            groups: vec!["dev".into()],
            ..UserInfo::default()
        };
        AdmissionAttributes::create(object, GroupVersionResource::new("apps", "v1", "deployments"), user)
    }

    fn check(context: &Context<'_>, expression: &str) -> bool {
        CompiledExpression::compile("check", expression).unwrap().evaluate_bool(context).unwrap()
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_request_bindings() {
        let attributes = attributes();
        assert_eq!(attributes.gvk, GroupVersionKind::new("apps", "v1", "Deployment"));

        let labels: BTreeMap<String, String> = [("env".to_string(), "production".to_string())].into();
        let context = attributes.activation(Some(&labels));
        assert!(check(&context, "request.operation == 'CREATE'"));
        assert!(check(&context, "request.resource.resource == 'deployments'"));
        assert!(check(&context, "request.userInfo.username == 'jane' && 'dev' in request.userInfo.groups"));
        assert!(check(&context, "object.metadata.name == request.name"));
        assert!(check(&context, "oldObject == null"));
        assert!(check(&context, "namespaceObject.metadata.labels.env == 'production'"));
    }
}
