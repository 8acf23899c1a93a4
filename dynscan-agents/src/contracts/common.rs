//! Common Contract Types
//!
//! Shared types used across all agent contracts.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Agent identification for registration and versioning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Unique agent identifier
    pub id: String,

    /// Semantic version
    pub version: String,

    /// Agent classification
    pub classification: AgentClassification,

    /// Human-readable description
    pub description: String,
}

/// Agent classification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentClassification {
    DynamicAppAnalysis,
}

/// Binary risk judgement attached to every observation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    #[serde(alias = "Low", alias = "LOW")]
    Low,
    #[serde(alias = "High", alias = "HIGH")]
    High,
}

impl RiskLevel {
    /// Logical OR over risk: high wins.
    pub fn or(self, other: RiskLevel) -> RiskLevel {
        if self == RiskLevel::High || other == RiskLevel::High {
            RiskLevel::High
        } else {
            RiskLevel::Low
        }
    }

    pub fn is_high(self) -> bool {
        self == RiskLevel::High
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Outcome of the work a step record describes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    #[default]
    Completed,
    Error,
}

/// Analysis stage a step record belongs to.
///
/// The declaration order is the execution order, so ordered maps keyed by
/// `Stage` list stages the way the run visited them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    #[serde(rename = "Step0_Emulator_Preparation")]
    Preparation,
    #[serde(rename = "Step1_App_Identification")]
    Identification,
    #[serde(rename = "Step2_App_Exploration")]
    Exploration,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preparation => "Step0_Emulator_Preparation",
            Self::Identification => "Step1_App_Identification",
            Self::Exploration => "Step2_App_Exploration",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Standard error response for agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentError {
    /// Error code
    pub code: String,

    /// Error message
    pub message: String,

    /// Request ID for correlation
    pub request_id: Uuid,

    /// Additional details
    pub details: Option<serde_json::Value>,
}
