use cel_interpreter::Value as CelValue;
use cel_interpreter::objects::Map;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Convert a JSON value to a CEL value
///
/// Integers that fit `i64` become `Int`, larger ones `UInt`, everything else `Float`.
#[must_use]
pub fn to_cel_value(value: &Value) -> CelValue {
    match value {
        Value::Null => CelValue::Null,
        Value::Bool(b) => CelValue::Bool(*b),
        Value::Number(n) => n
            .as_i64()
            .map(CelValue::Int)
            .or_else(|| n.as_u64().map(CelValue::UInt))
            .unwrap_or_else(|| CelValue::Float(n.as_f64().unwrap_or_default())),
        Value::String(s) => CelValue::String(Arc::new(s.clone())),
        Value::Array(items) => CelValue::List(Arc::new(items.iter().map(to_cel_value).collect())),
        Value::Object(map) => {
            let fields: HashMap<Arc<String>, CelValue> = map.iter().map(|(k, v)| (Arc::new(k.clone()), to_cel_value(v))).collect();
            CelValue::Map(Map::from(fields))
        }
    }
}

/// Build a CEL map from named values
#[must_use]
pub fn cel_map<I, K>(entries: I) -> CelValue
where
    I: IntoIterator<Item = (K, CelValue)>,
    K: Into<String>,
{
    let fields: HashMap<Arc<String>, CelValue> = entries.into_iter().map(|(k, v)| (Arc::new(k.into()), v)).collect();
    CelValue::Map(Map::from(fields))
}

#[must_use]
pub fn cel_string(value: impl Into<String>) -> CelValue {
    CelValue::String(Arc::new(value.into()))
}
