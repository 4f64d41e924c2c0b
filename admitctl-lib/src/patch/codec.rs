use super::{Patch, PatchOperation};
use crate::Result;
use ohno::IntoAppError;
use serde_json::{Value, json};

/// An `add` operation writing `value` at `path`
///
/// # Errors
///
/// Returns an error if `path` is not a valid JSON pointer
pub fn add_operation(path: &str, value: Value) -> Result<PatchOperation> {
    serde_json::from_value(json!({"op": "add", "path": path, "value": value})).into_app_err_with(|| format!("invalid patch path '{path}'"))
}

/// Encode each operation as its own JSON document
///
/// # Errors
///
/// Returns an error if an operation cannot be serialized
pub fn convert_patches(operations: &[PatchOperation]) -> Result<Vec<Vec<u8>>> {
    operations
        .iter()
        .map(|operation| serde_json::to_vec(operation).into_app_err("encoding a patch operation"))
        .collect()
}

/// Concatenate encoded operations into one JSON array document
#[must_use]
pub fn join_patches(patches: &[Vec<u8>]) -> Vec<u8> {
    let mut joined = Vec::with_capacity(patches.iter().map(|p| p.len() + 1).sum::<usize>() + 2);
    joined.push(b'[');
    for (index, patch) in patches.iter().enumerate() {
        if index > 0 {
            joined.push(b',');
        }
        joined.extend_from_slice(patch);
    }
    joined.push(b']');
    joined
}

/// Parse a JSON array of operations
///
/// # Errors
///
/// Returns an error if the document is not a valid RFC 6902 patch
pub fn decode_patch(document: &[u8]) -> Result<Patch> {
    serde_json::from_slice(document).into_app_err("decoding the JSON patch")
}
