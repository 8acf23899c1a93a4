//! Step Record Contracts
//!
//! A [`StepRecord`] is one weighted observation produced while analysing an
//! app. Records are appended to a [`StepLog`] in the order the work happened
//! and are echoed unchanged into the final verdict.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::common::{RiskLevel, Stage, StepStatus};

/// Confidence used for records that describe a failure rather than a judgement.
pub const ERROR_CONFIDENCE: f64 = 0.5;

/// One observation from a single stage of the analysis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepRecord {
    /// Stable identifier of the check (e.g. `check_2_explore_vision_3`)
    pub check_id: String,

    /// Component that produced the record (e.g. `vision_llm`)
    #[serde(alias = "analysis_agent")]
    pub agent: String,

    /// Contribution of this record to the final confidence
    pub weight: f64,

    /// Risk judgement carried by the record
    pub risk_level: RiskLevel,

    /// Confidence in `[0, 1]`
    pub confidence: f64,

    /// Human-readable explanation
    pub explanation: String,

    /// Whether the underlying work succeeded
    #[serde(default)]
    pub status: StepStatus,
}

impl StepRecord {
    /// A successful observation.
    pub fn completed(
        check_id: impl Into<String>,
        agent: impl Into<String>,
        weight: f64,
        risk_level: RiskLevel,
        confidence: f64,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            check_id: check_id.into(),
            agent: agent.into(),
            weight,
            risk_level,
            confidence: confidence.clamp(0.0, 1.0),
            explanation: explanation.into(),
            status: StepStatus::Completed,
        }
    }

    /// A failed step. Failures carry no weight and no risk signal of their own.
    pub fn error(
        check_id: impl Into<String>,
        agent: impl Into<String>,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            check_id: check_id.into(),
            agent: agent.into(),
            weight: 0.0,
            risk_level: RiskLevel::Low,
            confidence: ERROR_CONFIDENCE,
            explanation: explanation.into(),
            status: StepStatus::Error,
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == StepStatus::Error
    }
}

/// Ordered, append-only collection of step records grouped by stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct StepLog {
    stages: BTreeMap<Stage, Vec<StepRecord>>,
}

impl StepLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record to a stage. Records are never reordered or removed.
    pub fn push(&mut self, stage: Stage, record: StepRecord) {
        self.stages.entry(stage).or_default().push(record);
    }

    /// Records of one stage in append order.
    pub fn stage(&self, stage: Stage) -> &[StepRecord] {
        self.stages.get(&stage).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Stages that have at least one record.
    pub fn stages(&self) -> impl Iterator<Item = Stage> + '_ {
        self.stages.keys().copied()
    }

    /// All records in run order.
    pub fn records(&self) -> impl Iterator<Item = &StepRecord> {
        self.stages.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.stages.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Logical OR of every record's risk level.
    pub fn combined_risk(&self) -> RiskLevel {
        self.records()
            .fold(RiskLevel::Low, |acc, r| acc.or(r.risk_level))
    }

    /// Weight-normalized average confidence.
    ///
    /// Falls back to the plain mean when no record carries weight, and to
    /// [`ERROR_CONFIDENCE`] for an empty log.
    pub fn weighted_confidence(&self) -> f64 {
        let (weighted_sum, total_weight) = self
            .records()
            .filter(|r| r.weight > 0.0)
            .fold((0.0, 0.0), |(sum, w), r| (sum + r.weight * r.confidence, w + r.weight));

        if total_weight > 0.0 {
            return weighted_sum / total_weight;
        }

        let count = self.len();
        if count == 0 {
            ERROR_CONFIDENCE
        } else {
            self.records().map(|r| r.confidence).sum::<f64>() / count as f64
        }
    }

    /// Whether `other` contains every record of `self` unchanged, in order, per stage.
    pub fn is_echoed_by(&self, other: &StepLog) -> bool {
        self.stages
            .iter()
            .all(|(stage, records)| other.stage(*stage) == records.as_slice())
    }
}
