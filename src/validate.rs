//! Input validation for the relay endpoint.  The body is inspected as a
//! loose JSON value rather than deserialized straight into
//! `AnalysisRequest`, so every way of getting `code` wrong maps to the same
//! `RelayError::Validation` instead of an extractor rejection.

use serde_json::Value;

use crate::error::RelayError;
use crate::AnalysisRequest;

/// Upper bound on `code`, counted in characters.
pub const MAX_CODE_CHARS: usize = 100_000;

/// Parse the raw request body and extract the `code` field.
pub fn parse_body(raw: &[u8]) -> Result<AnalysisRequest, RelayError> {
    let value: Value = serde_json::from_slice(raw)
        .map_err(|_| RelayError::Validation("Request body must be valid JSON".into()))?;
    extract_code(&value)
}

/// Validate an already-parsed body.  `code` must be present, a string and
/// non-empty, and at most `MAX_CODE_CHARS` long.  Whitespace is not trimmed
/// and the content is otherwise opaque.
pub fn extract_code(body: &Value) -> Result<AnalysisRequest, RelayError> {
    let obj = body
        .as_object()
        .ok_or_else(|| RelayError::Validation("Request body must be a JSON object".into()))?;
    let code = match obj.get("code") {
        Some(Value::String(s)) if !s.is_empty() => s,
        Some(Value::String(_)) | Some(Value::Null) | None => {
            return Err(RelayError::Validation("Code parameter is required".into()))
        }
        Some(_) => {
            return Err(RelayError::Validation(
                "Code parameter must be a string".into(),
            ))
        }
    };
    // Byte length bounds the char count from above; skip the scan when it
    // cannot exceed the limit.
    if code.len() > MAX_CODE_CHARS && code.chars().count() > MAX_CODE_CHARS {
        return Err(code_too_long());
    }
    Ok(AnalysisRequest { code: code.clone() })
}

/// Error for a `code` value over `MAX_CODE_CHARS`.  Also used when the body
/// is too large to buffer and no explicit byte limit was configured.
pub fn code_too_long() -> RelayError {
    RelayError::Validation(format!(
        "Code parameter exceeds maximum length of {} characters",
        MAX_CODE_CHARS
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn is_validation(res: Result<AnalysisRequest, RelayError>) -> bool {
        matches!(res, Err(RelayError::Validation(_)))
    }

    #[test]
    fn accepts_plain_code() {
        let req = extract_code(&json!({"code": "def f(): pass"})).unwrap();
        assert_eq!(req.code, "def f(): pass");
    }

    #[test]
    fn rejects_missing_null_and_empty() {
        assert!(is_validation(extract_code(&json!({}))));
        assert!(is_validation(extract_code(&json!({"code": null}))));
        assert!(is_validation(extract_code(&json!({"code": ""}))));
    }

    #[test]
    fn rejects_non_string_code() {
        assert!(is_validation(extract_code(&json!({"code": 42}))));
        assert!(is_validation(extract_code(&json!({"code": ["a"]}))));
        assert!(is_validation(extract_code(&json!({"code": {"a": 1}}))));
        assert!(is_validation(extract_code(&json!({"code": true}))));
    }

    #[test]
    fn whitespace_only_code_is_not_trimmed() {
        let req = extract_code(&json!({"code": "   "})).unwrap();
        assert_eq!(req.code, "   ");
    }

    #[test]
    fn length_boundary_is_inclusive() {
        let at_limit = "a".repeat(MAX_CODE_CHARS);
        assert!(extract_code(&json!({ "code": at_limit })).is_ok());
        let over = "a".repeat(MAX_CODE_CHARS + 1);
        let err = extract_code(&json!({ "code": over })).unwrap_err();
        assert!(err.to_string().contains("100000"));
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        // 3 bytes per char, well over the byte count but at the char limit
        let wide = "€".repeat(MAX_CODE_CHARS);
        assert!(extract_code(&json!({ "code": wide })).is_ok());
    }

    #[test]
    fn rejects_non_object_and_malformed_bodies() {
        assert!(is_validation(extract_code(&json!(["code"]))));
        assert!(is_validation(extract_code(&json!("code"))));
        assert!(is_validation(parse_body(b"not json")));
        assert!(is_validation(parse_body(b"")));
        assert!(parse_body(br#"{"code":"x","extra":1}"#).is_ok());
    }
}
