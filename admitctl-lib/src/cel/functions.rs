use super::{CelContextProvider, to_cel_value};
use crate::resource::GroupVersionResource;
use cel_interpreter::{Context, ExecutionError, Value};
use std::sync::Arc;

/// Expose the provider's lookups to expressions
///
/// - `getResource(apiVersion, resource, namespace, name)` yields the object or `null`
/// - `listResources(apiVersion, resource, namespace)` yields a list of objects
pub fn register_provider_functions(context: &mut Context<'_>, provider: &Arc<dyn CelContextProvider>) {
    let getter = Arc::clone(provider);
    context.add_function(
        "getResource",
        move |api_version: Arc<String>, resource: Arc<String>, namespace: Arc<String>, name: Arc<String>| -> Result<Value, ExecutionError> {
            let gvr = GroupVersionResource::from_api_version(&api_version, &resource);
            match getter.get_resource(&gvr, &namespace, &name) {
                Ok(Some(found)) => Ok(to_cel_value(&found.into_value())),
                Ok(None) => Ok(Value::Null),
                Err(e) => Err(ExecutionError::function_error("getResource", &e.to_string())),
            }
        },
    );

    let lister = Arc::clone(provider);
    context.add_function(
        "listResources",
        move |api_version: Arc<String>, resource: Arc<String>, namespace: Arc<String>| -> Result<Value, ExecutionError> {
            let gvr = GroupVersionResource::from_api_version(&api_version, &resource);
            match lister.list_resources(&gvr, &namespace) {
                Ok(found) => Ok(Value::List(Arc::new(found.iter().map(|r| to_cel_value(&r.to_value())).collect()))),
                Err(e) => Err(ExecutionError::function_error("listResources", &e.to_string())),
            }
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cel::{CompiledExpression, StaticContextProvider};
    use crate::resource::Resource;
    use serde_json::json;

    fn provider() -> Arc<dyn CelContextProvider> {
        let mut provider = StaticContextProvider::new().unwrap();
        provider.add_resource(
            GroupVersionResource::new("", "v1", "configmaps"),
            Resource::from_value(json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {"name": "settings", "namespace": "default"},
                "data": {"mode": "strict"}
            }))
            .unwrap(),
        );
        Arc::new(provider)
    }

    fn check(expression: &str) -> bool {
        let mut context = Context::default();
        register_provider_functions(&mut context, &provider());
        CompiledExpression::compile("check", expression).unwrap().evaluate_bool(&context).unwrap()
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_get_resource() {
        assert!(check("getResource('v1', 'configmaps', 'default', 'settings').data.mode == 'strict'"));
        assert!(check("getResource('v1', 'configmaps', 'default', 'absent') == null"));
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_list_resources() {
        assert!(check("size(listResources('v1', 'configmaps', 'default')) == 1"));
        assert!(check("size(listResources('v1', 'configmaps', 'other')) == 0"));
    }
}
