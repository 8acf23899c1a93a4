//! Strict-then-fallback JSON extraction from free-text oracle responses.
//!
//! 1. Parse the whole response as a JSON object with every required key.
//! 2. Otherwise parse the outermost `{...}` span on its own.
//! 3. Otherwise fail with the raw response attached.

use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// An oracle response that did not contain the expected JSON.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Oracle response parse error: {reason}")]
pub struct OracleParseError {
    pub reason: String,
    /// The unmodified response text
    pub raw: String,
}

impl OracleParseError {
    fn new(reason: impl Into<String>, raw: &str) -> Self {
        Self {
            reason: reason.into(),
            raw: raw.to_string(),
        }
    }
}

/// Which tier produced the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseTier {
    Whole,
    BraceSpan,
}

fn brace_span() -> Option<&'static Regex> {
    static BRACE_SPAN: OnceLock<Option<Regex>> = OnceLock::new();
    BRACE_SPAN
        .get_or_init(|| Regex::new(r"(?s)\{.*\}").ok())
        .as_ref()
}

fn missing_keys(object: &Map<String, Value>, required: &[&str]) -> Vec<String> {
    required
        .iter()
        .filter(|key| !object.contains_key(**key))
        .map(|key| key.to_string())
        .collect()
}

fn object_with_keys(text: &str, required: &[&str]) -> Result<Map<String, Value>, String> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(object)) => {
            let missing = missing_keys(&object, required);
            if missing.is_empty() {
                Ok(object)
            } else {
                Err(format!("missing keys: {}", missing.join(", ")))
            }
        }
        Ok(other) => Err(format!("expected a JSON object, got {}", json_kind(&other))),
        Err(e) => Err(format!("invalid JSON: {}", e)),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Extract the JSON object carrying `required` keys.
pub fn extract_object(
    raw: &str,
    required: &[&str],
) -> Result<(Map<String, Value>, ParseTier), OracleParseError> {
    let whole_err = match object_with_keys(raw.trim(), required) {
        Ok(object) => return Ok((object, ParseTier::Whole)),
        Err(e) => e,
    };

    let span = brace_span()
        .and_then(|re| re.find(raw))
        .map(|m| m.as_str())
        .ok_or_else(|| OracleParseError::new(format!("{}; no JSON object found", whole_err), raw))?;

    debug!(tier = "brace_span", "Falling back to brace-delimited span");
    object_with_keys(span, required)
        .map(|object| (object, ParseTier::BraceSpan))
        .map_err(|e| OracleParseError::new(e, raw))
}

/// Parse an oracle response into `T`, requiring `required` keys to be present.
pub fn parse_oracle_json<T: DeserializeOwned>(
    raw: &str,
    required: &[&str],
) -> Result<T, OracleParseError> {
    let (object, _) = extract_object(raw, required)?;
    serde_json::from_value(Value::Object(object))
        .map_err(|e| OracleParseError::new(format!("unexpected shape: {}", e), raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Judgement {
        risk_level: String,
        confidence: f64,
    }

    const KEYS: &[&str] = &["risk_level", "confidence"];

    #[test]
    fn test_bare_json_uses_first_tier() {
        let raw = r#"{"risk_level": "low", "confidence": 0.9}"#;
        let (_, tier) = extract_object(raw, KEYS).unwrap();
        assert_eq!(tier, ParseTier::Whole);

        let judgement: Judgement = parse_oracle_json(raw, KEYS).unwrap();
        assert_eq!(judgement.confidence, 0.9);
    }

    #[test]
    fn test_json_in_prose_uses_brace_span() {
        let raw = "Sure! Here is my verdict:\n```json\n{\"risk_level\": \"high\",\n \"confidence\": 0.7}\n```\nLet me know.";
        let (_, tier) = extract_object(raw, KEYS).unwrap();
        assert_eq!(tier, ParseTier::BraceSpan);

        let judgement: Judgement = parse_oracle_json(raw, KEYS).unwrap();
        assert_eq!(judgement.risk_level, "high");
    }

    #[test]
    fn test_no_braces_is_error_with_raw() {
        let raw = "I cannot analyze this screenshot.";
        let err = parse_oracle_json::<Judgement>(raw, KEYS).unwrap_err();
        assert_eq!(err.raw, raw);
        assert!(err.reason.contains("no JSON object"));
    }

    #[test]
    fn test_missing_key_is_error() {
        let raw = r#"{"risk_level": "low"}"#;
        let err = parse_oracle_json::<Judgement>(raw, KEYS).unwrap_err();
        assert!(err.reason.contains("confidence"));
    }

    #[test]
    fn test_greedy_span_covers_nested_objects() {
        let raw = r#"Result: {"risk_level": "low", "confidence": 0.6, "extra": {"a": 1}} done"#;
        let judgement: Judgement = parse_oracle_json(raw, KEYS).unwrap();
        assert_eq!(judgement.confidence, 0.6);
    }

    #[test]
    fn test_wrong_type_is_error() {
        let raw = r#"{"risk_level": "low", "confidence": "very"}"#;
        assert!(parse_oracle_json::<Judgement>(raw, KEYS).is_err());
    }

    #[test]
    fn test_top_level_array_rejected() {
        let err = extract_object("[1, 2]", KEYS).unwrap_err();
        assert!(err.reason.contains("no JSON object"));
    }
}
