use super::JsonContext;
use crate::Result;
use ohno::bail;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::LazyLock;

static VARIABLE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").expect("invalid regex"));

/// The paths referenced as `{{ path }}` in `text`
#[must_use]
pub fn referenced_variables(text: &str) -> BTreeSet<String> {
    VARIABLE_REGEX
        .captures_iter(text)
        .filter_map(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|path| !path.is_empty())
        .collect()
}

/// Replace every `{{ path }}` in the strings of `value` with what `context` holds at `path`
///
/// A string consisting of a single reference takes the referenced value as is,
/// so `"{{ request.object.spec }}"` can expand to an object. References inside
/// longer strings are rendered as text.
pub fn substitute_variables(value: &Value, context: &JsonContext) -> Result<Value> {
    match value {
        Value::String(text) => substitute_string(text, context),
        Value::Array(items) => items.iter().map(|item| substitute_variables(item, context)).collect::<Result<Vec<_>>>().map(Value::Array),
        Value::Object(map) => {
            let mut substituted = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                let _ = substituted.insert(key.clone(), substitute_variables(item, context)?);
            }
            Ok(Value::Object(substituted))
        }
        other => Ok(other.clone()),
    }
}

/// Substitute references in a string, always producing a string
pub fn substitute_text(text: &str, context: &JsonContext) -> Result<String> {
    match substitute_string(text, context)? {
        Value::String(s) => Ok(s),
        other => Ok(render(&other)),
    }
}

fn substitute_string(text: &str, context: &JsonContext) -> Result<Value> {
    if let Some(captures) = VARIABLE_REGEX.captures(text)
        && let (Some(whole), Some(path)) = (captures.get(0), captures.get(1))
        && whole.start() == 0
        && whole.end() == text.len()
    {
        return resolve(path.as_str(), context);
    }

    let mut rendered = String::with_capacity(text.len());
    let mut last = 0;
    for captures in VARIABLE_REGEX.captures_iter(text) {
        let (Some(whole), Some(path)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        rendered.push_str(text.get(last..whole.start()).unwrap_or_default());
        rendered.push_str(&render(&resolve(path.as_str(), context)?));
        last = whole.end();
    }
    rendered.push_str(text.get(last..).unwrap_or_default());
    Ok(Value::String(rendered))
}

fn resolve(path: &str, context: &JsonContext) -> Result<Value> {
    match context.query(path)? {
        Some(value) => Ok(value.clone()),
        None => bail!("variable '{path}' could not be resolved"),
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
