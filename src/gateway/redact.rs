//! Field redaction for logs.
//!
//! Any field whose lowercased name contains one of [`SENSITIVE_FRAGMENTS`]
//! has its value partially masked: strings longer than 8 characters keep
//! their first and last 4 characters (`ya29****Xk2Q`), everything else
//! becomes `****`. Masking a masked value yields the same value, so
//! redaction can be applied repeatedly.

use serde_json::{Map, Value};

/// Name fragments that mark a field as sensitive
pub const SENSITIVE_FRAGMENTS: &[&str] = &["token", "secret", "code", "password"];

/// Replacement for values too short to partially reveal
pub const MASK: &str = "****";

/// Characters kept visible at each end of a long value
const VISIBLE_CHARS: usize = 4;

/// Whether a field name denotes sensitive data
#[must_use]
pub fn is_sensitive(key: &str) -> bool {
    let key = key.to_lowercase();
    SENSITIVE_FRAGMENTS.iter().any(|f| key.contains(f))
}

/// Partially mask a string value
#[must_use]
pub fn mask_value(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= VISIBLE_CHARS * 2 {
        return MASK.to_string();
    }

    let head: String = chars[..VISIBLE_CHARS].iter().collect();
    let tail: String = chars[chars.len() - VISIBLE_CHARS..].iter().collect();
    format!("{head}{MASK}{tail}")
}

/// Return a copy of `fields` with sensitive values masked
///
/// Non-string values under a sensitive key are replaced by [`MASK`]
/// outright. Non-sensitive values are copied unchanged.
#[must_use]
pub fn redact(fields: &Map<String, Value>) -> Map<String, Value> {
    fields
        .iter()
        .map(|(key, value)| {
            let value = if is_sensitive(key) {
                match value {
                    Value::String(s) => Value::String(mask_value(s)),
                    _ => Value::String(MASK.to_string()),
                }
            } else {
                value.clone()
            };
            (key.clone(), value)
        })
        .collect()
}

/// Redact a JSON value if it is an object; other shapes are not logged
#[must_use]
pub fn redact_value(value: &Value) -> Option<Value> {
    value.as_object().map(|map| Value::Object(redact(map)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_sensitive_keys() {
        for key in [
            "access_token",
            "Refresh_Token",
            "id_token",
            "client_secret",
            "code",
            "PASSWORD",
            "x_secret_value",
        ] {
            assert!(is_sensitive(key), "{key} should be sensitive");
        }
        for key in ["client_id", "redirect_uri", "scope", "grant_type", "status"] {
            assert!(!is_sensitive(key), "{key} should not be sensitive");
        }
    }

    #[test]
    fn test_mask_long_value() {
        assert_eq!(mask_value("ya29.a0AfH6SMBx"), "ya29****SMBx");
        assert_eq!(mask_value("123456789"), "1234****6789");
    }

    #[test]
    fn test_mask_short_value() {
        assert_eq!(mask_value(""), MASK);
        assert_eq!(mask_value("abc"), MASK);
        assert_eq!(mask_value("12345678"), MASK);
    }

    #[test]
    fn test_mask_multibyte() {
        // Character-based, never splits a code point
        assert_eq!(mask_value("ééééxyzwéééé"), "éééé****éééé");
    }

    #[test]
    fn test_redact_mapping() {
        let input = obj(json!({
            "client_id": "my-client.apps.googleusercontent.com",
            "client_secret": "GOCSPX-abcdefghijkl",
            "code": "4/0AX4XfWh",
            "expires_in": 3599,
            "refresh_token": 12,
        }));

        let expected = obj(json!({
            "client_id": "my-client.apps.googleusercontent.com",
            "client_secret": "GOCS****ijkl",
            "code": "4/0A****XfWh",
            "expires_in": 3599,
            "refresh_token": "****",
        }));

        assert_eq!(redact(&input), expected);
    }

    #[test]
    fn test_redact_is_idempotent() {
        let input = obj(json!({
            "access_token": "ya29.a0AfH6SMBxLongTokenValue",
            "short_secret": "abc",
            "exact_code": "12345678",
            "nine_code": "123456789",
            "numeric_token": 42,
            "scope": "openid email",
        }));

        let once = redact(&input);
        let twice = redact(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_redact_value_only_objects() {
        assert!(redact_value(&json!(["token"])).is_none());
        assert!(redact_value(&json!("token")).is_none());
        assert_eq!(
            redact_value(&json!({"token": "abc"})),
            Some(json!({"token": "****"}))
        );
    }
}
