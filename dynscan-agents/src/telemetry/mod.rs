//! Telemetry Module
//!
//! Run lifecycle events for analysis runs: start, stage changes, completion
//! and conservative fallbacks. Events are logged through `tracing` and,
//! when enabled, serialized as JSON lines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agents::{ANALYSIS_AGENT_ID, ANALYSIS_AGENT_VERSION};
use crate::contracts::{FallbackReason, FinalVerdict};
use crate::engine::RunState;
use crate::handlers::TraceContext;

/// Telemetry event types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryEventType {
    AnalysisStarted,
    StageEntered,
    AnalysisCompleted,
    /// The run resolved to the conservative verdict
    FallbackVerdict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub event_id: Uuid,

    pub event_type: TelemetryEventType,

    pub timestamp: DateTime<Utc>,

    pub agent_id: String,

    pub agent_version: String,

    /// Analysis run this event belongs to
    pub run_id: Uuid,

    /// Trace context (for distributed tracing)
    pub trace_context: Option<SerializableTraceContext>,

    pub payload: serde_json::Value,

    /// Duration in milliseconds (for completion events)
    pub duration_ms: Option<u64>,
}

/// Serializable trace context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializableTraceContext {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
}

impl From<&TraceContext> for SerializableTraceContext {
    fn from(ctx: &TraceContext) -> Self {
        Self {
            trace_id: ctx.trace_id.clone(),
            span_id: ctx.span_id.clone(),
            parent_span_id: ctx.parent_span_id.clone(),
        }
    }
}

/// Telemetry emitter.
#[derive(Debug, Clone)]
pub struct TelemetryEmitter {
    /// Whether to serialize events as JSON lines
    emit_to_stdout: bool,
}

impl Default for TelemetryEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryEmitter {
    /// Create a new telemetry emitter from `TELEMETRY_STDOUT` (default on).
    pub fn new() -> Self {
        let emit_to_stdout = std::env::var("TELEMETRY_STDOUT")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(true);

        Self { emit_to_stdout }
    }

    pub fn with_config(emit_to_stdout: bool) -> Self {
        Self { emit_to_stdout }
    }

    /// Base event for a run.
    fn event(&self, event_type: TelemetryEventType, run_id: Uuid, payload: serde_json::Value) -> TelemetryEvent {
        TelemetryEvent {
            event_id: Uuid::new_v4(),
            event_type,
            timestamp: Utc::now(),
            agent_id: ANALYSIS_AGENT_ID.to_string(),
            agent_version: ANALYSIS_AGENT_VERSION.to_string(),
            run_id,
            trace_context: None,
            payload,
            duration_ms: None,
        }
    }

    pub async fn analysis_started(&self, run_id: Uuid, app_ref: &str, trace_context: Option<&TraceContext>) {
        let mut event = self.event(
            TelemetryEventType::AnalysisStarted,
            run_id,
            serde_json::json!({ "app_ref": app_ref }),
        );
        event.trace_context = trace_context.map(Into::into);
        self.emit(event).await;
    }

    pub async fn stage_entered(&self, run_id: Uuid, state: RunState) {
        let event = self.event(
            TelemetryEventType::StageEntered,
            run_id,
            serde_json::json!({ "state": state }),
        );
        self.emit(event).await;
    }

    pub async fn analysis_completed(
        &self,
        run_id: Uuid,
        verdict: &FinalVerdict,
        duration_ms: u64,
        trace_context: Option<&TraceContext>,
    ) {
        let mut event = self.event(
            TelemetryEventType::AnalysisCompleted,
            run_id,
            serde_json::json!({
                "risk_level": verdict.risk_level,
                "confidence": verdict.confidence,
                "records": verdict.reasons.len(),
                "fallback_reason": verdict.fallback_reason,
            }),
        );
        event.trace_context = trace_context.map(Into::into);
        event.duration_ms = Some(duration_ms);
        self.emit(event).await;
    }

    pub async fn fallback_verdict(&self, run_id: Uuid, reason: FallbackReason, records: usize) {
        let event = self.event(
            TelemetryEventType::FallbackVerdict,
            run_id,
            serde_json::json!({ "reason": reason, "records": records }),
        );
        self.emit(event).await;
    }

    /// Emit a telemetry event.
    async fn emit(&self, event: TelemetryEvent) {
        match event.event_type {
            TelemetryEventType::FallbackVerdict => {
                warn!(
                    event_type = ?event.event_type,
                    run_id = %event.run_id,
                    "Telemetry: conservative verdict"
                );
            }
            _ => {
                info!(
                    event_type = ?event.event_type,
                    run_id = %event.run_id,
                    "Telemetry event"
                );
            }
        }

        if self.emit_to_stdout {
            if let Ok(json) = serde_json::to_string(&event) {
                debug!(telemetry = %json);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_emitter_config() {
        assert!(TelemetryEmitter::with_config(true).emit_to_stdout);
        assert!(!TelemetryEmitter::with_config(false).emit_to_stdout);
    }

    #[test]
    fn test_telemetry_event_serialization() {
        let emitter = TelemetryEmitter::with_config(false);
        let event = emitter.event(
            TelemetryEventType::StageEntered,
            Uuid::new_v4(),
            serde_json::json!({ "state": RunState::Exploring }),
        );

        let json = serde_json::to_string(&event).expect("Serialization should succeed");
        assert!(json.contains("stage_entered"));
        assert!(json.contains("\"state\":\"exploring\""));
    }

    #[tokio::test]
    async fn test_fallback_event_emits() {
        let emitter = TelemetryEmitter::with_config(true);
        emitter
            .fallback_verdict(Uuid::new_v4(), FallbackReason::PreparationFailed, 1)
            .await;
    }
}
