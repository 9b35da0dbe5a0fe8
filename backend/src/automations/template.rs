// Template expansion for action node configuration

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use super::conditions::lookup_path;

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([^}]+)\}\}").unwrap())
}

/// Expand `{{dotted.path}}` placeholders against context data.
///
/// Unresolved placeholders (missing path or null value) expand to the empty
/// string; expansion never fails.
pub fn expand_str(template: &str, data: &Value) -> String {
    placeholder()
        .replace_all(template, |caps: &regex::Captures| {
            match lookup_path(data, &caps[1]) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                Some(Value::Bool(b)) => b.to_string(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            }
        })
        .into_owned()
}

/// Expand every string found inside a json structure.
pub fn expand_value(value: &Value, data: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(expand_str(s, data)),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), expand_value(v, data)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|v| expand_value(v, data)).collect()),
        _ => value.clone(),
    }
}
