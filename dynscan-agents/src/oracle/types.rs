//! Typed oracle results.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::contracts::{Action, ActionParseError, RiskLevel, StepLog};

/// Keys every vision response must carry.
pub const VISION_KEYS: &[&str] = &["risk_level", "confidence", "reason"];

/// Keys an exploration vision response must carry.
pub const VISION_ACTION_KEYS: &[&str] = &["risk_level", "confidence", "reason", "action"];

pub const REFLECTION_KEYS: &[&str] = &["status", "risk_level", "confidence", "explanation"];

pub const AGGREGATION_KEYS: &[&str] = &["risk_level", "confidence", "reasons"];

/// Accepts `0.8` as well as `"0.8"`.
fn confidence<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Keeps any JSON value as the requested action text.
fn action_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

/// Vision oracle judgement of one screenshot.
///
/// The requested action stays raw text so that an unusable action never
/// discards the risk judgement it came with.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct VisionDecision {
    pub risk_level: RiskLevel,

    #[serde(deserialize_with = "confidence")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub confidence: f64,

    pub reason: String,

    /// Next UI action as requested; absent means no action
    #[serde(default, deserialize_with = "action_text")]
    pub action: Option<String>,
}

impl VisionDecision {
    /// The requested action, [`Action::None`] when absent.
    pub fn parsed_action(&self) -> Result<Action, ActionParseError> {
        match self.action.as_deref() {
            Some(text) => text.parse(),
            None => Ok(Action::None),
        }
    }
}

/// Reflection outcome for the last action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReflectionStatus {
    /// The action had the intended effect
    #[serde(rename = "as_expected", alias = "completed", alias = "expected")]
    AsExpected,
    /// The action misfired but a corrective Back should recover
    #[serde(rename = "unexpected_recoverable", alias = "recoverable")]
    Recoverable,
    /// The action misfired and the app is stuck
    #[serde(rename = "unexpected_blocking", alias = "blocking")]
    Blocking,
}

/// Reflection oracle judgement of a before/after screenshot pair.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ReflectionVerdict {
    pub status: ReflectionStatus,

    pub risk_level: RiskLevel,

    #[serde(deserialize_with = "confidence")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub confidence: f64,

    pub explanation: String,

    #[serde(default)]
    pub insight: Option<String>,
}

/// Aggregation oracle verdict over every step record.
///
/// `reasons` is only checked for the echo of the submitted records, so it is
/// kept as untyped JSON.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct AggregationVerdict {
    pub risk_level: RiskLevel,

    #[serde(deserialize_with = "confidence")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub confidence: f64,

    pub reasons: Value,
}

impl AggregationVerdict {
    /// Whether `reasons` holds every record of `log` unchanged.
    pub fn echoes(&self, log: &StepLog) -> bool {
        serde_json::from_value::<StepLog>(self.reasons.clone())
            .map(|echoed| log.is_echoed_by(&echoed))
            .unwrap_or(false)
    }

    /// Number of records found under the stage keys of `reasons`.
    pub fn echoed_records(&self) -> usize {
        match &self.reasons {
            Value::Object(stages) => stages
                .values()
                .filter_map(Value::as_array)
                .map(Vec::len)
                .sum(),
            _ => 0,
        }
    }
}
