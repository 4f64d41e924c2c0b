use super::Patch;
use super::pointer::{decode_tokens, encode_tokens};
use crate::Result;
use json_patch::PatchOperation;
use ohno::{IntoAppError, app_err, bail};
use serde_json::{Map, Value};

/// Relaxations of strict RFC 6902 behavior
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[expect(clippy::struct_excessive_bools, reason = "each flag is an independent patch option")]
pub struct ApplyOptions {
    /// Accept indices such as `-1` counting back from the end of an array
    pub support_negative_indices: bool,

    /// Removing a location that does not exist is a no-op
    pub allow_missing_path_on_remove: bool,

    /// Missing parents of an `add` target are created as empty objects or arrays
    pub ensure_path_exists_on_add: bool,
}

impl ApplyOptions {
    /// Every relaxation enabled
    #[must_use]
    pub const fn lenient() -> Self {
        Self {
            support_negative_indices: true,
            allow_missing_path_on_remove: true,
            ensure_path_exists_on_add: true,
        }
    }
}

/// Apply a patch to a serialized JSON document
///
/// An empty patch returns the input bytes untouched.
///
/// # Errors
///
/// Returns an error if the document is not JSON or if any operation fails
pub fn apply(document: &[u8], patch: &Patch, options: &ApplyOptions) -> Result<Vec<u8>> {
    if patch.0.is_empty() {
        return Ok(document.to_vec());
    }

    let mut value: Value = serde_json::from_slice(document).into_app_err("parsing the document to patch")?;
    apply_to_value(&mut value, patch, options)?;
    serde_json::to_vec(&value).into_app_err("serializing the patched document")
}

/// Apply a patch to a JSON value in place
///
/// Operations run in order; the first failure stops the patch and leaves the
/// value partially patched.
///
/// # Errors
///
/// Returns an error naming the failing operation
pub fn apply_to_value(document: &mut Value, patch: &Patch, options: &ApplyOptions) -> Result<()> {
    for (index, operation) in patch.0.iter().enumerate() {
        let mut raw = serde_json::to_value(operation).into_app_err("encoding a patch operation")?;
        let name = raw.get("op").and_then(Value::as_str).unwrap_or_default().to_string();
        let path = raw.get("path").and_then(Value::as_str).unwrap_or_default().to_string();
        let context = || format!("patch operation {index} ({name} '{path}') failed");

        if !relax(document, &mut raw, options).map_err(|e| app_err!("{}: {e}", context()))? {
            continue;
        }

        let operation: PatchOperation = serde_json::from_value(raw).into_app_err_with(context)?;
        json_patch::patch(document, &[operation]).into_app_err_with(context)?;
    }
    Ok(())
}

/// Rewrite an encoded operation for the enabled relaxations
///
/// Returns `false` when the operation has nothing to do.
fn relax(document: &mut Value, raw: &mut Value, options: &ApplyOptions) -> Result<bool> {
    if options.support_negative_indices {
        for key in ["from", "path"] {
            let resolved = raw
                .get(key)
                .and_then(Value::as_str)
                .map(|pointer| resolve_negative_indices(&*document, pointer));
            if let Some(resolved) = resolved {
                raw[key] = Value::String(resolved);
            }
        }
    }

    let path = raw.get("path").and_then(Value::as_str).unwrap_or_default();
    match raw.get("op").and_then(Value::as_str) {
        Some("remove") if options.allow_missing_path_on_remove => Ok(document.pointer(path).is_some()),
        Some("add") if options.ensure_path_exists_on_add => {
            ensure_parents(document, path)?;
            Ok(true)
        }
        _ => Ok(true),
    }
}

/// Replace negative array indices in `pointer` with the index they count back to
fn resolve_negative_indices(document: &Value, pointer: &str) -> String {
    let Some(mut tokens) = decode_tokens(pointer) else {
        return pointer.to_string();
    };

    let mut current = Some(document);
    for token in &mut tokens {
        if let Some(Value::Array(items)) = current
            && let Some(index) = negative_index(token, items.len())
        {
            *token = index.to_string();
        }
        current = current.and_then(|value| child_of(value, token));
    }
    encode_tokens(&tokens)
}

fn negative_index(token: &str, len: usize) -> Option<usize> {
    let magnitude = token.strip_prefix('-')?.parse::<usize>().ok()?;
    len.checked_sub(magnitude)
}

fn child_of<'a>(value: &'a Value, token: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(token),
        Value::Array(items) => items.get(token.parse::<usize>().ok()?),
        _ => None,
    }
}

/// Create the missing parents of an `add` target
fn ensure_parents(document: &mut Value, path: &str) -> Result<()> {
    let Some(tokens) = decode_tokens(path) else {
        return Ok(());
    };
    let Some((_, parents)) = tokens.split_last() else {
        return Ok(());
    };

    let mut current = document;
    for (position, token) in parents.iter().enumerate() {
        let next = tokens.get(position + 1).map_or("", String::as_str);
        current = match current {
            Value::Object(map) => {
                let child = map.entry(token.clone()).or_insert(Value::Null);
                if child.is_null() {
                    *child = empty_container(next);
                }
                child
            }
            Value::Array(items) => {
                let len = items.len();
                let Some(child) = token.parse::<usize>().ok().and_then(|index| items.get_mut(index)) else {
                    bail!("index '{token}' is out of bounds for an array of length {len}");
                };
                child
            }
            other => bail!("cannot create '{token}' beneath scalar '{other}'"),
        };
    }
    Ok(())
}

fn empty_container(next_token: &str) -> Value {
    if next_token == "-" || next_token.parse::<usize>().is_ok() {
        Value::Array(Vec::new())
    } else {
        Value::Object(Map::new())
    }
}
