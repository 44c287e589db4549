//! Argument validation against provider-declared input schemas.
//!
//! Covers the subset of JSON Schema tool-providers actually declare:
//! `required`, per-property `type` (single or list), `enum`, and
//! `additionalProperties: false`.

use serde_json::{Map, Value};

use crate::error::{AgentError, Result};

/// Validate tool arguments against an input schema
pub fn validate_arguments(schema: &Value, arguments: &Map<String, Value>) -> Result<()> {
    let Some(schema) = schema.as_object() else {
        return Ok(());
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            match arguments.get(key) {
                None | Some(Value::Null) => {
                    return Err(AgentError::ToolValidation(format!(
                        "Missing required parameter: {}",
                        key
                    )));
                }
                Some(_) => {}
            }
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));

    for (key, value) in arguments {
        let Some(property) = properties.and_then(|p| p.get(key)) else {
            if closed {
                return Err(AgentError::ToolValidation(format!("Unexpected parameter: {}", key)));
            }
            continue;
        };

        if let Some(expected) = property.get("type") {
            if !type_matches(expected, value) {
                return Err(AgentError::ToolValidation(format!(
                    "Parameter '{}' should be {}, got {}",
                    key,
                    describe_type(expected),
                    json_type(value)
                )));
            }
        }

        if let Some(allowed) = property.get("enum").and_then(Value::as_array) {
            if !allowed.contains(value) {
                return Err(AgentError::ToolValidation(format!(
                    "Parameter '{}' is not one of the allowed values",
                    key
                )));
            }
        }
    }

    Ok(())
}

fn type_matches(expected: &Value, value: &Value) -> bool {
    match expected {
        Value::String(name) => single_type_matches(name, value),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .any(|name| single_type_matches(name, value)),
        _ => true,
    }
}

fn single_type_matches(name: &str, value: &Value) -> bool {
    match name {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn describe_type(expected: &Value) -> String {
    match expected {
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" or "),
        other => other.as_str().unwrap_or("any").to_string(),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn balance_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "publicKey": {"type": "string"},
                "tokenMints": {"type": "array"},
                "network": {"type": "string", "enum": ["mainnet", "devnet"]}
            },
            "required": ["publicKey"]
        })
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_valid_arguments() {
        let a = args(json!({"publicKey": "abc", "tokenMints": ["SOL"]}));
        assert!(validate_arguments(&balance_schema(), &a).is_ok());
    }

    #[test]
    fn test_missing_required() {
        let err = validate_arguments(&balance_schema(), &args(json!({}))).unwrap_err();
        assert!(matches!(err, AgentError::ToolValidation(msg) if msg.contains("publicKey")));
    }

    #[test]
    fn test_wrong_type_and_enum() {
        let wrong = args(json!({"publicKey": 42}));
        assert!(validate_arguments(&balance_schema(), &wrong).is_err());

        let bad_enum = args(json!({"publicKey": "abc", "network": "testnet"}));
        assert!(validate_arguments(&balance_schema(), &bad_enum).is_err());
    }

    #[test]
    fn test_closed_schema_rejects_unknown() {
        let schema = json!({"type": "object", "properties": {}, "additionalProperties": false});
        assert!(validate_arguments(&schema, &args(json!({"x": 1}))).is_err());

        let open = json!({"type": "object", "properties": {}});
        assert!(validate_arguments(&open, &args(json!({"x": 1}))).is_ok());
    }

    #[test]
    fn test_type_list() {
        let schema = json!({"properties": {"amount": {"type": ["number", "string"]}}});
        assert!(validate_arguments(&schema, &args(json!({"amount": "1.5"}))).is_ok());
        assert!(validate_arguments(&schema, &args(json!({"amount": true}))).is_err());
    }
}
