use super::GroupVersionKind;
use crate::Result;
use ohno::{IntoAppError, app_err};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A structured resource held as an untyped JSON object
///
/// An empty object stands for "no resource", which is what a context yields when
/// a reserved binding such as `request.oldObject` is absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resource(Map<String, Value>);

impl Resource {
    #[must_use]
    pub const fn new(object: Map<String, Value>) -> Self {
        Self(object)
    }

    /// Wrap a JSON value, which must be an object
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a JSON object
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(object) => Ok(Self(object)),
            other => Err(app_err!("expected a JSON object, found '{other}'")),
        }
    }

    /// Parse the serialized form produced by [`Self::to_json`]
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a JSON object
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes).into_app_err("parsing resource JSON")?;
        Self::from_value(value)
    }

    /// Serialize to JSON bytes
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.0).into_app_err("serializing resource to JSON")
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub const fn object(&self) -> &Map<String, Value> {
        &self.0
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        self.0.get("kind").and_then(Value::as_str).unwrap_or_default()
    }

    #[must_use]
    pub fn api_version(&self) -> &str {
        self.0.get("apiVersion").and_then(Value::as_str).unwrap_or_default()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.metadata_str("name")
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        self.metadata_str("namespace")
    }

    #[must_use]
    pub fn labels(&self) -> BTreeMap<String, String> {
        self.metadata_string_map("labels")
    }

    #[must_use]
    pub fn annotations(&self) -> BTreeMap<String, String> {
        self.metadata_string_map("annotations")
    }

    #[must_use]
    pub fn group_version_kind(&self) -> GroupVersionKind {
        GroupVersionKind::from_api_version(self.api_version(), self.kind())
    }

    /// Look up a value by JSON pointer (RFC 6901)
    #[must_use]
    pub fn pointer(&self, pointer: &str) -> Option<&Value> {
        let mut segments = pointer.strip_prefix('/')?.split('/').map(|s| s.replace("~1", "/").replace("~0", "~"));
        let mut current = self.0.get(&segments.next()?)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(&segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Set `metadata.<key>`, creating `metadata` when missing
    pub fn set_metadata(&mut self, key: &str, value: Value) {
        let metadata = self.0.entry("metadata").or_insert_with(|| Value::Object(Map::new()));
        if !metadata.is_object() {
            *metadata = Value::Object(Map::new());
        }
        if let Value::Object(map) = metadata {
            let _ = map.insert(key.to_string(), value);
        }
    }

    fn metadata_str(&self, key: &str) -> &str {
        self.0
            .get("metadata")
            .and_then(|metadata| metadata.get(key))
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    fn metadata_string_map(&self, key: &str) -> BTreeMap<String, String> {
        self.0
            .get("metadata")
            .and_then(|metadata| metadata.get(key))
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl From<Map<String, Value>> for Resource {
    fn from(object: Map<String, Value>) -> Self {
        Self(object)
    }
}
