use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The binding that selects the admission operation
pub const OPERATION_BINDING: &str = "request.operation";

/// The admission operation a context simulates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::IntoStaticStr)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Operation {
    #[default]
    Create,
    Update,
    Delete,
}

impl Operation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Derive the operation from the `request.operation` binding
///
/// `DELETE` and `UPDATE` select their operations, anything else (including an
/// absent binding) is a create.
#[must_use]
pub fn infer_operation(bindings: &BTreeMap<String, Value>) -> Operation {
    match bindings.get(OPERATION_BINDING).and_then(Value::as_str) {
        Some("DELETE") => Operation::Delete,
        Some("UPDATE") => Operation::Update,
        _ => Operation::Create,
    }
}
