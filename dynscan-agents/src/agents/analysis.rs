//! Dynamic App Analysis Agent
//!
//! ## Purpose
//! Install an app on a virtual device, explore it with vision-guided UI
//! actions and produce a risk verdict backed by every step record.
//!
//! ## Failure Modes
//! - Invalid request: returns a validation error
//! - Device preparation, launch or aggregation failure: returns the
//!   conservative verdict (high risk, 0.5 confidence) with `fallback_reason`

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use super::traits::Agent;
use crate::contracts::{AgentClassification, AgentIdentity, AnalyzeRequest, FinalVerdict};
use crate::device::DeviceOps;
use crate::engine::{CancelHandle, ExplorationEngine};
use crate::oracle::Oracle;

/// Agent version (semantic versioning).
pub const ANALYSIS_AGENT_VERSION: &str = "1.0.0";

/// Agent identifier.
pub const ANALYSIS_AGENT_ID: &str = "dynamic-app-analysis-agent-v1";

#[derive(Debug, Error)]
pub enum AnalysisAgentError {
    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<validator::ValidationErrors> for AnalysisAgentError {
    fn from(err: validator::ValidationErrors) -> Self {
        AnalysisAgentError::Validation(err.to_string())
    }
}

/// Agent front of an [`ExplorationEngine`].
pub struct AppAnalysisAgent<D, O> {
    identity: AgentIdentity,
    engine: Arc<ExplorationEngine<D, O>>,
}

impl<D, O> Clone for AppAnalysisAgent<D, O> {
    fn clone(&self) -> Self {
        Self {
            identity: self.identity.clone(),
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<D: DeviceOps, O: Oracle> AppAnalysisAgent<D, O> {
    pub fn new(engine: ExplorationEngine<D, O>) -> Self {
        Self::from_shared(Arc::new(engine))
    }

    pub fn from_shared(engine: Arc<ExplorationEngine<D, O>>) -> Self {
        Self {
            identity: AgentIdentity {
                id: ANALYSIS_AGENT_ID.to_string(),
                version: ANALYSIS_AGENT_VERSION.to_string(),
                classification: AgentClassification::DynamicAppAnalysis,
                description: "Dynamic behavior analysis of mobile apps on a virtual device".to_string(),
            },
            engine,
        }
    }

    pub fn engine(&self) -> &ExplorationEngine<D, O> {
        &self.engine
    }

    /// Validate and run one analysis under the given run id and cancel handle.
    #[instrument(skip(self, request, cancel), fields(app_ref = %request.app_ref))]
    pub async fn analyze(
        &self,
        run_id: Uuid,
        request: AnalyzeRequest,
        cancel: &CancelHandle,
    ) -> Result<FinalVerdict, AnalysisAgentError> {
        self.validate_input(&request)?;
        let request = AnalyzeRequest::new(request.app_ref, Some(request.instructions));
        info!("Starting dynamic analysis");
        Ok(self.engine.analyze(run_id, &request, cancel).await)
    }
}

#[async_trait]
impl<D: DeviceOps, O: Oracle> Agent for AppAnalysisAgent<D, O> {
    type Input = AnalyzeRequest;
    type Output = FinalVerdict;
    type Error = AnalysisAgentError;

    fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    fn validate_input(&self, input: &Self::Input) -> Result<(), Self::Error> {
        input.validate()?;
        if input.app_ref.trim().is_empty() {
            return Err(AnalysisAgentError::Validation(
                "app_ref must not be blank".to_string(),
            ));
        }
        Ok(())
    }

    async fn execute(&self, input: Self::Input) -> Result<Self::Output, Self::Error> {
        Ok(self
            .engine
            .analyze(Uuid::new_v4(), &input, &CancelHandle::new())
            .await)
    }
}
