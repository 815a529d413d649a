//! JSON-Schema subset used by tool definitions.
//!
//! Supported keywords: `type` (string or list), `properties`, `required`,
//! `additionalProperties` (bool or schema), `items`, `enum`, `const`,
//! `minLength`/`maxLength`, `minimum`/`maximum`, `minItems`/`maxItems`.
//! Unknown keywords are ignored, so richer schemas still load.

use std::fmt;

use serde_json::{Map, Value};

/// One schema violation, located by a dotted path (`$` is the root).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub path: String,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Validate `value` against `schema`, collecting every violation.
pub fn validate(schema: &Value, value: &Value) -> Vec<Violation> {
    let mut out = Vec::new();
    check(schema, value, "$", &mut out);
    out
}

/// Whether `schema` is shaped like a schema at all (an object or a boolean).
pub fn is_schema(schema: &Value) -> bool {
    matches!(schema, Value::Object(_) | Value::Bool(_))
}

fn check(schema: &Value, value: &Value, path: &str, out: &mut Vec<Violation>) {
    let rules = match schema {
        Value::Bool(true) => return,
        Value::Bool(false) => {
            out.push(violation(path, "no value is allowed here"));
            return;
        }
        Value::Object(rules) => rules,
        _ => return,
    };

    if let Some(expected) = rules.get("type") {
        if !type_matches(expected, value) {
            out.push(violation(
                path,
                format!("expected {}, got {}", describe_type(expected), type_name(value)),
            ));
            // Other keywords assume the right type.
            return;
        }
    }

    if let Some(Value::Array(allowed)) = rules.get("enum") {
        if !allowed.contains(value) {
            out.push(violation(path, "value is not one of the allowed values"));
        }
    }
    if let Some(expected) = rules.get("const") {
        if expected != value {
            out.push(violation(path, format!("expected constant {expected}")));
        }
    }

    match value {
        Value::Object(map) => check_object(rules, map, path, out),
        Value::Array(items) => check_array(rules, items, path, out),
        Value::String(s) => check_string(rules, s, path, out),
        Value::Number(n) => {
            if let Some(n) = n.as_f64() {
                check_number(rules, n, path, out);
            }
        }
        Value::Bool(_) | Value::Null => {}
    }
}

fn check_object(
    rules: &Map<String, Value>,
    map: &Map<String, Value>,
    path: &str,
    out: &mut Vec<Violation>,
) {
    if let Some(Value::Array(required)) = rules.get("required") {
        for name in required.iter().filter_map(Value::as_str) {
            if !map.contains_key(name) {
                out.push(violation(&join(path, name), "required property is missing"));
            }
        }
    }

    let properties = rules.get("properties").and_then(Value::as_object);
    let additional = rules.get("additionalProperties");

    for (name, child) in map {
        let child_path = join(path, name);
        match properties.and_then(|p| p.get(name)) {
            Some(child_schema) => check(child_schema, child, &child_path, out),
            None => match additional {
                Some(Value::Bool(false)) => {
                    out.push(violation(&child_path, "unexpected property"));
                }
                Some(schema @ Value::Object(_)) => check(schema, child, &child_path, out),
                _ => {}
            },
        }
    }
}

fn check_array(rules: &Map<String, Value>, items: &[Value], path: &str, out: &mut Vec<Violation>) {
    if let Some(min) = rules.get("minItems").and_then(Value::as_u64) {
        if (items.len() as u64) < min {
            out.push(violation(path, format!("expected at least {min} items")));
        }
    }
    if let Some(max) = rules.get("maxItems").and_then(Value::as_u64) {
        if (items.len() as u64) > max {
            out.push(violation(path, format!("expected at most {max} items")));
        }
    }
    if let Some(item_schema) = rules.get("items") {
        for (i, item) in items.iter().enumerate() {
            check(item_schema, item, &format!("{path}[{i}]"), out);
        }
    }
}

fn check_string(rules: &Map<String, Value>, s: &str, path: &str, out: &mut Vec<Violation>) {
    let len = s.chars().count() as u64;
    if let Some(min) = rules.get("minLength").and_then(Value::as_u64) {
        if len < min {
            out.push(violation(path, format!("must be at least {min} characters")));
        }
    }
    if let Some(max) = rules.get("maxLength").and_then(Value::as_u64) {
        if len > max {
            out.push(violation(path, format!("must be at most {max} characters")));
        }
    }
}

fn check_number(rules: &Map<String, Value>, n: f64, path: &str, out: &mut Vec<Violation>) {
    if let Some(min) = rules.get("minimum").and_then(Value::as_f64) {
        if n < min {
            out.push(violation(path, format!("must be >= {min}")));
        }
    }
    if let Some(max) = rules.get("maximum").and_then(Value::as_f64) {
        if n > max {
            out.push(violation(path, format!("must be <= {max}")));
        }
    }
}

fn type_matches(expected: &Value, value: &Value) -> bool {
    match expected {
        Value::String(t) => single_type_matches(t, value),
        Value::Array(types) => types
            .iter()
            .filter_map(Value::as_str)
            .any(|t| single_type_matches(t, value)),
        _ => true,
    }
}

fn single_type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "number" => value.is_number(),
        "integer" => match value {
            Value::Number(n) => {
                n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            _ => false,
        },
        // Unknown type names never reject.
        _ => true,
    }
}

fn describe_type(expected: &Value) -> String {
    match expected {
        Value::Array(types) => types
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" or "),
        Value::String(t) => t.clone(),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Object(_) => "object",
        Value::Array(_) => "array",
        Value::String(_) => "string",
        Value::Bool(_) => "boolean",
        Value::Null => "null",
        Value::Number(_) => "number",
    }
}

fn join(path: &str, name: &str) -> String {
    if path == "$" {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}

fn violation(path: &str, message: impl Into<String>) -> Violation {
    Violation {
        path: path.to_string(),
        message: message.into(),
    }
}
