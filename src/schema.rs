//! Schema validation for structured output
//!
//! Full JSON-Schema support is a provider concern; the built-in validator covers the
//! subset structured-output schemas actually use: `type`, `required`, `properties`,
//! `items` and `enum`.

use serde_json::Value;

use crate::error::{Result, UnillmError, ValidationIssue};

/// Validates a parsed object against a schema.
pub trait SchemaValidator: Send + Sync {
    /// Return the (possibly normalized) object, or `UnillmError::Validation` with every issue found.
    fn validate(&self, value: &Value, schema: &Value) -> Result<Value>;
}

/// Subset JSON-Schema validator
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicSchemaValidator;

impl SchemaValidator for BasicSchemaValidator {
    fn validate(&self, value: &Value, schema: &Value) -> Result<Value> {
        let mut issues = Vec::new();
        check(value, schema, "$", &mut issues);
        if issues.is_empty() {
            Ok(value.clone())
        } else {
            Err(UnillmError::validation(issues))
        }
    }
}

fn type_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn check(value: &Value, schema: &Value, path: &str, issues: &mut Vec<ValidationIssue>) {
    let type_ok = match schema.get("type") {
        Some(Value::String(t)) => type_matches(value, t),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(|t| t.as_str())
            .any(|t| type_matches(value, t)),
        _ => true,
    };
    if !type_ok {
        issues.push(ValidationIssue::new(
            path,
            format!("expected {}, got {}", schema["type"], type_name(value)),
        ));
        return;
    }

    if let Some(allowed) = schema.get("enum").and_then(|e| e.as_array())
        && !allowed.contains(value)
    {
        issues.push(ValidationIssue::new(path, format!("{} is not one of the allowed values", value)));
    }

    if let Some(obj) = value.as_object() {
        if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
            for field in required.iter().filter_map(|f| f.as_str()) {
                if !obj.contains_key(field) {
                    issues.push(ValidationIssue::new(
                        format!("{}.{}", path, field),
                        "missing required field",
                    ));
                }
            }
        }
        if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
            for (key, sub_schema) in props {
                if let Some(sub_value) = obj.get(key) {
                    check(sub_value, sub_schema, &format!("{}.{}", path, key), issues);
                }
            }
        }
    }

    if let (Some(items), Some(item_schema)) = (value.as_array(), schema.get("items")) {
        for (i, item) in items.iter().enumerate() {
            check(item, item_schema, &format!("{}[{}]", path, i), issues);
        }
    }
}
