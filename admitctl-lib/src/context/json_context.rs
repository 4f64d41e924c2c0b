use super::{Operation, RequestInfo};
use crate::Result;
use crate::resource::Resource;
use ohno::{IntoAppError, bail};
use serde_json::{Map, Value};

/// Binding holding the resource under evaluation
pub const OBJECT_BINDING: &str = "request.object";

/// Binding holding the prior state of the resource for updates and deletes
pub const OLD_OBJECT_BINDING: &str = "request.oldObject";

/// A hierarchical variable store addressed by dotted paths
///
/// Keys such as `request.object.metadata.name` address nested objects, which
/// are created on demand. Values added under an existing object are merged
/// into it key by key.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonContext {
    root: Value,
}

impl Default for JsonContext {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonContext {
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: Value::Object(Map::new()),
        }
    }

    /// Register `resource` as `request.object`, replacing any previous value
    pub fn add_resource(&mut self, resource: &Resource) -> Result<()> {
        self.replace(OBJECT_BINDING, resource.to_value())
    }

    /// Register `resource` as `request.oldObject`, replacing any previous value
    pub fn add_old_resource(&mut self, resource: &Resource) -> Result<()> {
        self.replace(OLD_OBJECT_BINDING, resource.to_value())
    }

    pub fn add_operation(&mut self, operation: Operation) -> Result<()> {
        self.replace(super::OPERATION_BINDING, Value::String(operation.to_string()))
    }

    /// Register the caller's identity under `request.userInfo`, `request.roles`
    /// and `request.clusterRoles`
    pub fn add_user_info(&mut self, info: &RequestInfo) -> Result<()> {
        let user_info = serde_json::to_value(&info.user_info).into_app_err("serializing user info")?;
        self.replace("request.userInfo", user_info)?;
        self.replace("request.roles", Value::from(info.roles.clone()))?;
        self.replace("request.clusterRoles", Value::from(info.cluster_roles.clone()))
    }

    /// Merge `value` in at the dotted `key`
    pub fn add_variable(&mut self, key: &str, value: Value) -> Result<()> {
        let segments = split_key(key)?;
        merge_into(slot_mut(&mut self.root, &segments), value);
        Ok(())
    }

    fn replace(&mut self, key: &str, value: Value) -> Result<()> {
        let segments = split_key(key)?;
        *slot_mut(&mut self.root, &segments) = value;
        Ok(())
    }

    /// Look up a path such as `request.object.spec.containers[0].image`
    ///
    /// Returns `Ok(None)` when the path is well formed but nothing lives there.
    pub fn query(&self, path: &str) -> Result<Option<&Value>> {
        let mut current = &self.root;
        for step in parse_query(path)? {
            let next = match (step, current) {
                (Step::Key(key), Value::Object(map)) => map.get(key),
                (Step::Index(index), Value::Array(items)) => items.get(index),
                _ => None,
            };
            match next {
                Some(value) => current = value,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    #[must_use]
    pub const fn as_value(&self) -> &Value {
        &self.root
    }
}

enum Step<'a> {
    Key(&'a str),
    Index(usize),
}

fn split_key(key: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = key.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        bail!("invalid variable key '{key}'");
    }
    Ok(segments)
}

fn slot_mut<'a>(root: &'a mut Value, segments: &[&str]) -> &'a mut Value {
    let mut current = root;
    for segment in segments {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        current = match current {
            Value::Object(map) => map.entry((*segment).to_string()).or_insert(Value::Null),
            other => other,
        };
    }
    current
}

fn merge_into(target: &mut Value, value: Value) {
    match (target, value) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, value) in incoming {
                merge_into(existing.entry(key).or_insert(Value::Null), value);
            }
        }
        (target, value) => *target = value,
    }
}

fn parse_query(path: &str) -> Result<Vec<Step<'_>>> {
    if path.trim().is_empty() {
        bail!("empty query");
    }

    let mut steps = Vec::new();
    for part in path.split('.') {
        let (name, mut indices) = part.split_once('[').map_or((part, None), |(name, tail)| (name, Some(tail)));
        if name.is_empty() && indices.is_none() {
            bail!("invalid query '{path}'");
        }
        if !name.is_empty() {
            steps.push(Step::Key(name));
        }

        while let Some(tail) = indices {
            let Some((digits, after)) = tail.split_once(']') else {
                bail!("unterminated index in query '{path}'");
            };
            let index = digits
                .parse::<usize>()
                .into_app_err_with(|| format!("invalid index '{digits}' in query '{path}'"))?;
            steps.push(Step::Index(index));

            indices = if after.is_empty() {
                None
            } else {
                let Some(next) = after.strip_prefix('[') else {
                    bail!("invalid query '{path}'");
                };
                Some(next)
            };
        }
    }
    Ok(steps)
}
