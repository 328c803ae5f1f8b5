//! # JSON Module
//!
//! Body parsing with simd-json, serialization with serde_json.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// Parse JSON string to a typed value using simd-json
///
/// # Errors
///
/// Returns `Error::Body` if parsing fails
pub fn parse_json<T: DeserializeOwned>(json_str: &str) -> Result<T> {
    let mut bytes = json_str.as_bytes().to_vec();
    parse_json_bytes(&mut bytes)
}

/// Parse JSON bytes to a typed value using simd-json
///
/// simd-json parses in place, so the buffer is clobbered.
///
/// # Errors
///
/// Returns `Error::Body` if parsing fails
pub fn parse_json_bytes<T: DeserializeOwned>(bytes: &mut [u8]) -> Result<T> {
    simd_json::from_slice(bytes).map_err(|e| Error::Body {
        reason: format!("JSON parse error: {e}"),
    })
}

/// Parse a request body that must be a JSON object
///
/// # Errors
///
/// Returns `Error::Body` when the body is not JSON or not an object
pub fn parse_object(body: &[u8]) -> Result<Map<String, Value>> {
    let mut bytes = body.to_vec();
    match parse_json_bytes::<Value>(&mut bytes)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::Body {
            reason: format!("expected a JSON object, got {}", kind_name(&other)),
        }),
    }
}

/// Serialize a value to JSON bytes
///
/// # Errors
///
/// Returns `Error::Json` when the value cannot be serialized
pub fn to_json_vec<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

const fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TestData {
        name: String,
        age: i32,
    }

    #[test]
    fn test_parse_json_object() {
        let json = r#"{"name": "John", "age": 30}"#;
        let data: TestData = parse_json(json).unwrap();
        assert_eq!(data.name, "John");
        assert_eq!(data.age, 30);
    }

    #[test]
    fn test_parse_json_map() {
        let json = r#"{"key": "value", "count": "42"}"#;
        let map: HashMap<String, String> = parse_json(json).unwrap();
        assert_eq!(map.get("key"), Some(&"value".to_string()));
    }

    #[test]
    fn test_parse_object_keeps_order() {
        let map = parse_object(br#"{"b": 1, "a": 2}"#).unwrap();
        let keys: Vec<_> = map.keys().cloned().collect();
        assert_eq!(keys, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_parse_object_rejects_arrays() {
        let err = parse_object(b"[1, 2]").unwrap_err();
        assert!(err.to_string().contains("an array"));
    }

    #[test]
    fn test_to_json_vec() {
        let data = TestData {
            name: "Bob".to_string(),
            age: 40,
        };
        let json = to_json_vec(&data).unwrap();
        assert_eq!(json, br#"{"name":"Bob","age":40}"#.to_vec());
    }

    #[test]
    fn test_invalid_json() {
        let result: Result<TestData> = parse_json("not valid json");
        assert!(matches!(result, Err(Error::Body { .. })));
    }
}
