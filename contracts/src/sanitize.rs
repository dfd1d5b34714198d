//! Redaction of sensitive input fields before logging or event emission.
//!
//! The original input is never mutated; sanitization always produces a
//! copy. The agent itself receives the unmodified value.

use serde_json::{Map, Value};

const REDACTED: &str = "[REDACTED]";

/// Key substrings treated as sensitive, matched case-insensitively.
const SENSITIVE_KEYS: &[&str] = &["password", "token", "apikey", "api_key", "secret"];

/// Whether a key names a sensitive field.
pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|needle| lower.contains(needle))
}

/// Produce a copy of `value` with every sensitive field replaced by a
/// redaction marker, recursing through objects and arrays.
pub fn sanitize_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(sanitize_map(map)),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_value).collect()),
        other => other.clone(),
    }
}

/// Object-level variant of [`sanitize_value`].
pub fn sanitize_map(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .map(|(key, value)| {
            if is_sensitive_key(key) {
                (key.clone(), Value::from(REDACTED))
            } else {
                (key.clone(), sanitize_value(value))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_known_sensitive_keys() {
        let input = json!({
            "msg": "hello",
            "password": "hunter2",
            "token": "abc",
            "apiKey": "sk-1",
            "api_key": "sk-2",
            "secret": "shh",
        });
        let clean = sanitize_value(&input);
        assert_eq!(clean["msg"], "hello");
        for key in ["password", "token", "apiKey", "api_key", "secret"] {
            assert_eq!(clean[key], "[REDACTED]", "{key} should be redacted");
        }
    }

    #[test]
    fn matches_keys_case_insensitively_and_by_substring() {
        let input = json!({"AccessToken": "t", "DB_PASSWORD": "p", "client_secret": "s"});
        let clean = sanitize_value(&input);
        assert_eq!(clean["AccessToken"], "[REDACTED]");
        assert_eq!(clean["DB_PASSWORD"], "[REDACTED]");
        assert_eq!(clean["client_secret"], "[REDACTED]");
    }

    #[test]
    fn recurses_into_nested_structures() {
        let input = json!({
            "config": {"apiKey": "sk-1", "region": "us"},
            "attempts": [{"token": "t1"}, {"note": "ok"}],
        });
        let clean = sanitize_value(&input);
        assert_eq!(clean["config"]["apiKey"], "[REDACTED]");
        assert_eq!(clean["config"]["region"], "us");
        assert_eq!(clean["attempts"][0]["token"], "[REDACTED]");
        assert_eq!(clean["attempts"][1]["note"], "ok");
    }

    #[test]
    fn original_value_is_untouched() {
        let input = json!({"password": "hunter2"});
        let _ = sanitize_value(&input);
        assert_eq!(input["password"], "hunter2");
    }
}
