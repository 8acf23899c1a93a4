//! Analysis HTTP Handler
//!
//! Entry point for `POST /api/v1/analyze` and the CLI `analyze` command.
//!
//! This handler:
//! - Validates the request
//! - Runs the exploration engine to a verdict
//! - Emits run telemetry
//! - Returns the caller contract `{status: completed, result: {...}}`

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, span, Level};
use uuid::Uuid;

use crate::agents::{AnalysisAgentError, AppAnalysisAgent};
use crate::contracts::{AgentError, AnalyzeRequest, AnalyzeResponse};
use crate::device::DeviceOps;
use crate::engine::CancelHandle;
use crate::oracle::Oracle;
use crate::telemetry::TelemetryEmitter;

/// Analysis request as received over HTTP.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeCallRequest {
    #[serde(flatten)]
    pub input: AnalyzeRequest,

    /// Optional trace context
    #[serde(default)]
    pub trace_context: Option<TraceContext>,
}

impl From<AnalyzeRequest> for AnalyzeCallRequest {
    fn from(input: AnalyzeRequest) -> Self {
        Self {
            input,
            trace_context: None,
        }
    }
}

/// Trace context for distributed tracing.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
}

/// Handler errors.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Agent error: {0}")]
    Agent(#[from] AnalysisAgentError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub struct AnalyzeHandler<D, O> {
    agent: AppAnalysisAgent<D, O>,
    telemetry: TelemetryEmitter,
}

impl<D: DeviceOps, O: Oracle> AnalyzeHandler<D, O> {
    pub fn new(agent: AppAnalysisAgent<D, O>) -> Self {
        Self::with_components(agent, TelemetryEmitter::new())
    }

    /// Create a handler with custom components (for testing).
    pub fn with_components(agent: AppAnalysisAgent<D, O>, telemetry: TelemetryEmitter) -> Self {
        Self { agent, telemetry }
    }

    pub fn agent(&self) -> &AppAnalysisAgent<D, O> {
        &self.agent
    }

    /// Handle an analysis request.
    ///
    /// Only an invalid request is an error; every valid request completes
    /// with a verdict.
    #[instrument(skip(self, request, cancel), fields(app_ref = %request.input.app_ref))]
    pub async fn handle(
        &self,
        request: AnalyzeCallRequest,
        cancel: &CancelHandle,
    ) -> Result<AnalyzeResponse, AgentError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let trace_context = request.trace_context.as_ref();

        let _span = trace_context.map(|ctx| {
            span!(
                Level::INFO,
                "app_analysis",
                trace_id = %ctx.trace_id,
                span_id = %ctx.span_id
            )
        });

        info!(%run_id, "Handling analysis request");
        self.telemetry
            .analysis_started(run_id, &request.input.app_ref, trace_context)
            .await;

        match self.agent.analyze(run_id, request.input.clone(), cancel).await {
            Ok(verdict) => {
                let elapsed = (Utc::now() - started_at).num_milliseconds().max(0) as u64;
                self.telemetry
                    .analysis_completed(run_id, &verdict, elapsed, trace_context)
                    .await;
                Ok(AnalyzeResponse::completed(run_id, started_at, verdict))
            }
            Err(e) => {
                let e = HandlerError::from(e);
                error!(error = %e, "Analysis request rejected");
                Err(AgentError {
                    code: error_code(&e),
                    message: e.to_string(),
                    request_id: run_id,
                    details: None,
                })
            }
        }
    }
}

/// Map errors to error codes.
fn error_code(error: &HandlerError) -> String {
    match error {
        HandlerError::Agent(AnalysisAgentError::Validation(_)) => "ANALYSIS_INPUT_INVALID".to_string(),
        HandlerError::Configuration(_) => "ANALYSIS_CONFIG".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let validation = HandlerError::Agent(AnalysisAgentError::Validation("app_ref".to_string()));
        assert_eq!(error_code(&validation), "ANALYSIS_INPUT_INVALID");
        assert_eq!(
            error_code(&HandlerError::Configuration("x".to_string())),
            "ANALYSIS_CONFIG"
        );
    }

    #[test]
    fn test_call_request_defaults() {
        let request: AnalyzeCallRequest = serde_json::from_str(r#"{"app_ref":"game.apk"}"#).unwrap();
        assert_eq!(request.input.app_ref, "game.apk");
        assert_eq!(request.input.instructions, crate::contracts::DEFAULT_INSTRUCTIONS);
        assert!(request.trace_context.is_none());
    }
}
