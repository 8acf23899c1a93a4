//! Analysis Request and Verdict Contracts
//!
//! Input and output of a single app analysis run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::common::RiskLevel;
use super::step_record::{StepLog, ERROR_CONFIDENCE};

/// Instructions used when the caller supplies none.
pub const DEFAULT_INSTRUCTIONS: &str = "No specific instructions.";

fn default_instructions() -> String {
    DEFAULT_INSTRUCTIONS.to_string()
}

/// Request to analyze one app.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AnalyzeRequest {
    /// Local artifact path, artifact file name, or already-uploaded name
    #[validate(length(min = 1, message = "app_ref must not be empty"))]
    pub app_ref: String,

    /// Free-text guidance for the exploration
    #[serde(default = "default_instructions")]
    pub instructions: String,
}

impl AnalyzeRequest {
    pub fn new(app_ref: impl Into<String>, instructions: Option<String>) -> Self {
        Self {
            app_ref: app_ref.into(),
            instructions: instructions
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(default_instructions),
        }
    }
}

/// Why a run produced the conservative verdict instead of an aggregated one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    PreparationFailed,
    IdentificationFailed,
    AggregationFailed,
    Cancelled,
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PreparationFailed => write!(f, "preparation_failed"),
            Self::IdentificationFailed => write!(f, "identification_failed"),
            Self::AggregationFailed => write!(f, "aggregation_failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Outcome of an analysis run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinalVerdict {
    pub risk_level: RiskLevel,

    pub confidence: f64,

    /// Every step record of the run keyed by stage
    pub reasons: StepLog,

    /// Set when the run could not be analyzed and the verdict is the conservative default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<FallbackReason>,
}

impl FinalVerdict {
    /// Verdict produced when a run fails: high risk at 0.5 confidence.
    ///
    /// A caller cannot distinguish this from a genuine high-risk finding by
    /// `risk_level` alone; `fallback_reason` tells them apart.
    pub fn conservative(reasons: StepLog, reason: FallbackReason) -> Self {
        Self {
            risk_level: RiskLevel::High,
            confidence: ERROR_CONFIDENCE,
            reasons,
            fallback_reason: Some(reason),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback_reason.is_some()
    }
}

/// Run status returned to callers. Runs always complete.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Completed,
}

/// Response to an analysis request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub status: AnalysisStatus,

    pub result: FinalVerdict,

    /// Run identifier for log correlation
    pub run_id: Uuid,

    pub started_at: DateTime<Utc>,

    pub completed_at: DateTime<Utc>,
}

impl AnalyzeResponse {
    pub fn completed(run_id: Uuid, started_at: DateTime<Utc>, result: FinalVerdict) -> Self {
        Self {
            status: AnalysisStatus::Completed,
            result,
            run_id,
            started_at,
            completed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{Stage, StepRecord};

    #[test]
    fn test_request_defaults_instructions() {
        let request: AnalyzeRequest = serde_json::from_str(r#"{"app_ref": "sample.apk"}"#).unwrap();
        assert_eq!(request.instructions, DEFAULT_INSTRUCTIONS);
        assert!(request.validate().is_ok());

        let blank = AnalyzeRequest::new("sample.apk", Some("   ".to_string()));
        assert_eq!(blank.instructions, DEFAULT_INSTRUCTIONS);
    }

    #[test]
    fn test_request_rejects_empty_app_ref() {
        let request = AnalyzeRequest::new("", None);
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_conservative_verdict() {
        let mut log = StepLog::new();
        log.push(
            Stage::Preparation,
            StepRecord::error("check_0_init_device", "emulator_device_init", "no device"),
        );

        let verdict = FinalVerdict::conservative(log, FallbackReason::PreparationFailed);
        assert_eq!(verdict.risk_level, RiskLevel::High);
        assert_eq!(verdict.confidence, 0.5);
        assert!(verdict.is_fallback());

        let json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(json["fallback_reason"], "preparation_failed");
        assert!(json["reasons"]["Step0_Emulator_Preparation"].is_array());
    }

    #[test]
    fn test_response_status_is_completed() {
        let verdict = FinalVerdict {
            risk_level: RiskLevel::Low,
            confidence: 0.9,
            reasons: StepLog::new(),
            fallback_reason: None,
        };
        let response = AnalyzeResponse::completed(Uuid::new_v4(), Utc::now(), verdict);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "completed");
        assert!(json["result"].get("fallback_reason").is_none());
    }
}
