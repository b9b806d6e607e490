use serde::Serialize;
use serde_json::Value;

use crate::errors::{RequestError, Result};

/// Flatten a serializable value into query pairs.
///
/// The value must serialize to a JSON object (or `null` for no parameters).
/// Arrays become repeated keys, `null` members are skipped, nested objects are
/// rejected since XRPC query strings cannot express them.
pub(crate) fn query_pairs<P: Serialize + ?Sized>(params: &P) -> Result<Vec<(String, String)>> {
    let value = serde_json::to_value(params).map_err(|e| invalid(e.to_string()))?;
    let object = match value {
        Value::Object(object) => object,
        Value::Null => return Ok(Vec::new()),
        other => {
            return Err(invalid(format!(
                "query parameters must be an object, got {}",
                type_name(&other)
            )));
        }
    };

    let mut pairs = Vec::with_capacity(object.len());
    for (key, value) in object {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                for item in items {
                    if let Some(scalar) = scalar(&key, item)? {
                        pairs.push((key.clone(), scalar));
                    }
                }
            }
            other => {
                if let Some(scalar) = scalar(&key, other)? {
                    pairs.push((key, scalar));
                }
            }
        }
    }
    Ok(pairs)
}

fn scalar(key: &str, value: Value) -> Result<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(b.to_string())),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::String(s) => Ok(Some(s)),
        other => Err(invalid(format!(
            "parameter `{key}` is a nested {}",
            type_name(&other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn invalid(message: String) -> crate::Error {
    RequestError::Validation { message }.into()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn flattens_scalars_and_arrays() {
        let pairs = query_pairs(&json!({
            "actor": "alice.test",
            "limit": 25,
            "includePins": false,
            "uris": ["at://a", "at://b"],
            "cursor": null,
        }))
        .unwrap();
        assert!(pairs.contains(&("actor".into(), "alice.test".into())));
        assert!(pairs.contains(&("limit".into(), "25".into())));
        assert!(pairs.contains(&("includePins".into(), "false".into())));
        assert_eq!(pairs.iter().filter(|(k, _)| k == "uris").count(), 2);
        assert!(!pairs.iter().any(|(k, _)| k == "cursor"));
    }

    #[test]
    fn rejects_nested_and_non_objects() {
        assert!(query_pairs(&json!({"filter": {"a": 1}})).is_err());
        assert!(query_pairs(&json!({"list": [[1]]})).is_err());
        assert!(query_pairs(&json!([1, 2])).is_err());
        assert!(query_pairs(&()).unwrap().is_empty());
    }
}
