//! Exploration engine.
//!
//! Drives one analysis run through `Preparing -> Identifying -> Exploring ->
//! Aggregating`, appending a [`StepRecord`] for every unit of work. Any
//! failure that prevents analysis resolves to the conservative verdict.

use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::budget::ErrorBudget;
use super::config::EngineConfig;
use super::memory::Memory;
use super::state::RunState;
use crate::contracts::{
    Action, AnalyzeRequest, FallbackReason, FinalVerdict, RiskLevel, Stage, StepLog, StepRecord,
};
use crate::device::{DeviceError, DeviceOps, SessionId, TaskId};
use crate::oracle::prompts::{self, ExplorationPrompt, IdentificationPrompt, ReflectionPrompt};
use crate::oracle::{Oracle, OracleClient, ReflectionStatus};
use crate::retry::RetryPolicy;
use crate::telemetry::TelemetryEmitter;

/// Record producers, as they appear in `StepRecord::agent`.
pub mod agents {
    pub const DEVICE_INIT: &str = "emulator_device_init";
    pub const UPLOAD: &str = "emulator_upload_app";
    pub const INSTALL: &str = "emulator_install_app";
    pub const RUN_APP: &str = "emulator_run_app";
    pub const SCREENSHOT: &str = "emulator_screenshot";
    pub const ACTION: &str = "emulator_action";
    pub const VISION: &str = "vision_llm";
    pub const REFLECTION: &str = "reflection_llm";
}

/// Confidence of a device step that completed.
const DEVICE_STEP_CONFIDENCE: f64 = 0.8;
/// Confidence of a captured screenshot.
const SCREENSHOT_CONFIDENCE: f64 = 0.7;
/// Weight of every vision judgement.
const VISION_WEIGHT: f64 = 1.0;
/// Gap between aggregated and recorded confidence worth a warning.
const CONFIDENCE_DRIFT: f64 = 0.4;

/// Caller-side cancellation, observed at stage and iteration boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn checkpoint(&self) -> Result<(), FallbackReason> {
        if self.is_cancelled() {
            Err(FallbackReason::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Mutable state of one run.
struct Run {
    id: Uuid,
    state: RunState,
    log: StepLog,
    memory: Memory,
    budget: ErrorBudget,
    session: Option<SessionId>,
}

impl Run {
    fn new(id: Uuid, config: &EngineConfig) -> Self {
        Self {
            id,
            state: RunState::Preparing,
            log: StepLog::new(),
            memory: Memory::new(config.memory_enabled),
            budget: ErrorBudget::new(config.max_total_errors, config.max_consecutive_errors),
            session: None,
        }
    }

    fn completed(&mut self, stage: Stage, check_id: &str, agent: &str, confidence: f64, explanation: String) {
        self.log.push(
            stage,
            StepRecord::completed(check_id, agent, 0.0, RiskLevel::Low, confidence, explanation),
        );
    }

    fn failed(&mut self, stage: Stage, check_id: &str, agent: &str, explanation: String) {
        warn!(check_id, agent, %explanation, "Step failed");
        self.log.push(stage, StepRecord::error(check_id, agent, explanation));
    }
}

/// Launched app being explored.
struct Target {
    task: TaskId,
    instructions: String,
}

pub struct ExplorationEngine<D, O> {
    device: D,
    oracle: OracleClient<O>,
    config: EngineConfig,
    telemetry: TelemetryEmitter,
}

impl<D: DeviceOps, O: Oracle> ExplorationEngine<D, O> {
    pub fn new(device: D, oracle: OracleClient<O>, config: EngineConfig) -> Self {
        Self {
            device,
            oracle,
            config,
            telemetry: TelemetryEmitter::new(),
        }
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryEmitter) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Analyze one app. Always yields a verdict; failures resolve to the
    /// conservative one with `fallback_reason` set.
    #[instrument(skip(self, run_id, request, cancel), fields(run_id = %run_id, app_ref = %request.app_ref))]
    pub async fn analyze(&self, run_id: Uuid, request: &AnalyzeRequest, cancel: &CancelHandle) -> FinalVerdict {
        let mut run = Run::new(run_id, &self.config);
        self.telemetry.stage_entered(run.id, run.state).await;

        let verdict = match self.drive(&mut run, request, cancel).await {
            Ok(verdict) => verdict,
            Err(reason) => {
                self.enter(&mut run, RunState::Failed).await;
                self.telemetry.fallback_verdict(run.id, reason, run.log.len()).await;
                FinalVerdict::conservative(std::mem::take(&mut run.log), reason)
            }
        };

        if let Some(session) = run.session.take() {
            self.device.release(session).await;
        }
        self.enter(&mut run, RunState::Completed).await;

        info!(
            risk_level = %verdict.risk_level,
            confidence = verdict.confidence,
            records = verdict.reasons.len(),
            fallback = verdict.is_fallback(),
            "Analysis finished"
        );
        verdict
    }

    async fn drive(
        &self,
        run: &mut Run,
        request: &AnalyzeRequest,
        cancel: &CancelHandle,
    ) -> Result<FinalVerdict, FallbackReason> {
        cancel.checkpoint()?;
        let app_ref = self.prepare(run, &request.app_ref).await?;

        cancel.checkpoint()?;
        self.enter(run, RunState::Identifying).await;
        let target = self.identify(run, &app_ref, &request.instructions).await?;

        cancel.checkpoint()?;
        self.enter(run, RunState::Exploring).await;
        self.explore(run, &target, cancel).await;

        self.enter(run, RunState::Aggregating).await;
        self.aggregate(run, &request.instructions).await
    }

    async fn enter(&self, run: &mut Run, next: RunState) {
        match run.state.transition(next) {
            Ok(state) => {
                run.state = state;
                debug!(run_id = %run.id, state = %state, "Run state changed");
                self.telemetry.stage_entered(run.id, state).await;
            }
            Err(e) => warn!(error = %e, "Ignoring run state transition"),
        }
    }

    /// Run a retried device call and record its outcome.
    async fn device_step<T, F, Fut>(
        &self,
        run: &mut Run,
        stage: Stage,
        check_id: &str,
        agent: &str,
        label: &str,
        policy: &RetryPolicy,
        op: F,
    ) -> Result<T, DeviceError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, DeviceError>>,
    {
        match policy.retry(check_id, op, |e: &DeviceError| e.is_retryable()).await {
            Ok(value) => {
                run.completed(stage, check_id, agent, DEVICE_STEP_CONFIDENCE, format!("{} - success.", label));
                Ok(value)
            }
            Err(e) => {
                run.failed(stage, check_id, agent, format!("{} failed: {}", label, e));
                Err(e)
            }
        }
    }

    /// Init, optional upload, install. Returns the app reference to launch.
    async fn prepare(&self, run: &mut Run, app_ref: &str) -> Result<String, FallbackReason> {
        let policy = self.config.preparation_retry;
        let stage = Stage::Preparation;

        let session = self
            .device_step(run, stage, "check_0_init_device", agents::DEVICE_INIT, "Initialize the device", &policy, |_| {
                self.device.init_device()
            })
            .await
            .map_err(|_| FallbackReason::PreparationFailed)?;
        run.session = Some(session);

        let mut app_ref = app_ref.to_string();
        if is_local_file(&app_ref).await {
            let path = Path::new(&app_ref).to_path_buf();
            app_ref = self
                .device_step(run, stage, "check_0_upload_app", agents::UPLOAD, "Upload the app", &policy, |_| {
                    self.device.upload_app(&path)
                })
                .await
                .map_err(|_| FallbackReason::PreparationFailed)?;
        }

        let package = self
            .device_step(run, stage, "check_0_install_app", agents::INSTALL, "Install the app", &policy, |_| {
                self.device.install_app(session, &app_ref)
            })
            .await
            .map_err(|_| FallbackReason::PreparationFailed)?;
        info!(%session, %package, "App installed");

        Ok(app_ref)
    }

    /// Launch, initial screenshot and the identification judgement.
    async fn identify(&self, run: &mut Run, app_ref: &str, instructions: &str) -> Result<Target, FallbackReason> {
        let stage = Stage::Identification;
        let session = run.session.ok_or(FallbackReason::PreparationFailed)?;
        let policy = self.config.run_app_retry;

        let launch = self
            .device_step(run, stage, "check_1_run_app", agents::RUN_APP, "Run the app", &policy, |_| {
                self.device.run_app(session, app_ref)
            })
            .await
            .map_err(|_| FallbackReason::PreparationFailed)?;
        info!(task_id = %launch.task_id, package = %launch.package, events = ?launch.events, "App launched");

        let screenshot = match self.device.capture_screenshot(launch.task_id).await {
            Ok(bytes) => {
                run.completed(
                    stage,
                    "check_1_initial_screenshot",
                    agents::SCREENSHOT,
                    SCREENSHOT_CONFIDENCE,
                    "Initial screenshot after launch - success.".to_string(),
                );
                bytes
            }
            Err(e) => {
                run.failed(
                    stage,
                    "check_1_initial_screenshot",
                    agents::SCREENSHOT,
                    format!("Initial screenshot failed: {}", e),
                );
                return Err(FallbackReason::IdentificationFailed);
            }
        };

        let prompt = prompts::identification(&IdentificationPrompt { instructions });
        match self.oracle.identify(&prompt, &screenshot).await {
            Ok(decision) => {
                if decision.risk_level.is_high() {
                    run.memory.remember(&decision.reason);
                }
                run.log.push(
                    stage,
                    StepRecord::completed(
                        "check_1_ident_vision",
                        agents::VISION,
                        VISION_WEIGHT,
                        decision.risk_level,
                        decision.confidence,
                        decision.reason,
                    ),
                );
            }
            Err(e) => {
                run.failed(
                    stage,
                    "check_1_ident_vision",
                    agents::VISION,
                    format!("Identification judgement failed: {}", e),
                );
                run.budget.record_failure();
            }
        }

        Ok(Target {
            task: launch.task_id,
            instructions: instructions.to_string(),
        })
    }

    /// Sampling loop bounded by wall clock, error budget and cancellation.
    async fn explore(&self, run: &mut Run, target: &Target, cancel: &CancelHandle) {
        let started = Instant::now();
        let planned = self.config.planned_iterations();
        let mut iteration = 0u32;

        while started.elapsed() < self.config.run_duration {
            tokio::time::sleep(self.config.check_interval).await;
            if cancel.is_cancelled() {
                info!(iteration, "Exploration cancelled");
                break;
            }

            iteration += 1;
            let succeeded = self.explore_once(run, target, iteration, planned).await;
            if run.budget.record(succeeded) {
                warn!(
                    iteration,
                    total_errors = run.budget.total_errors,
                    consecutive_errors = run.budget.consecutive_errors,
                    "Error budget exceeded, stopping exploration"
                );
                break;
            }
        }

        info!(
            iterations = iteration,
            total_errors = run.budget.total_errors,
            insights = run.memory.len(),
            "Exploration finished"
        );
    }

    /// One iteration. Returns whether every step of it succeeded.
    #[instrument(skip(self, run, target, planned), fields(task_id = %target.task))]
    async fn explore_once(&self, run: &mut Run, target: &Target, iteration: u32, planned: u32) -> bool {
        let stage = Stage::Exploration;

        let shot_id = format!("check_2_explore_shot_{}", iteration);
        let before = match self.device.capture_screenshot(target.task).await {
            Ok(bytes) => {
                run.completed(
                    stage,
                    &shot_id,
                    agents::SCREENSHOT,
                    SCREENSHOT_CONFIDENCE,
                    format!("Exploration screenshot {} - success.", iteration),
                );
                bytes
            }
            Err(e) => {
                run.failed(stage, &shot_id, agents::SCREENSHOT, format!("Screenshot failed: {}", e));
                return false;
            }
        };

        let vision_id = format!("check_2_explore_vision_{}", iteration);
        let memory = run.memory.render();
        let prompt = prompts::exploration(&ExplorationPrompt {
            instructions: &target.instructions,
            memory: &memory,
            iteration,
            planned_iterations: planned,
        });
        let decision = match self.oracle.decide(&prompt, &before).await {
            Ok(decision) => decision,
            Err(e) => {
                run.failed(stage, &vision_id, agents::VISION, format!("Exploration judgement failed: {}", e));
                return false;
            }
        };

        debug!(risk_level = %decision.risk_level, action = ?decision.action, "Exploration judgement");
        if decision.risk_level.is_high() {
            run.memory.remember(&decision.reason);
        }
        let requested = decision.parsed_action();
        run.log.push(
            stage,
            StepRecord::completed(
                vision_id,
                agents::VISION,
                VISION_WEIGHT,
                decision.risk_level,
                decision.confidence,
                decision.reason,
            ),
        );

        let action_id = format!("check_2_action_{}", iteration);
        let action = match requested {
            Ok(action) => action,
            Err(e) => {
                run.failed(stage, &action_id, agents::ACTION, format!("Unusable action: {}", e));
                return false;
            }
        };
        if action.is_none() {
            return true;
        }

        if let Err(e) = self.device.perform_action(target.task, &action).await {
            run.failed(stage, &action_id, agents::ACTION, format!("Action {} failed: {}", action, e));
            return false;
        }
        run.completed(
            stage,
            &action_id,
            agents::ACTION,
            DEVICE_STEP_CONFIDENCE,
            format!("Action {} - success.", action),
        );

        if !self.config.reflection_enabled {
            return true;
        }
        self.reflect(run, target, iteration, &action, &before).await
    }

    /// Compare before/after screenshots of an action and recover if asked to.
    async fn reflect(&self, run: &mut Run, target: &Target, iteration: u32, action: &Action, before: &[u8]) -> bool {
        let stage = Stage::Exploration;
        let check_id = format!("check_2_reflection_{}", iteration);

        let after = match self.device.capture_screenshot(target.task).await {
            Ok(bytes) => bytes,
            Err(e) => {
                run.failed(stage, &check_id, agents::REFLECTION, format!("Screenshot after action failed: {}", e));
                return false;
            }
        };

        let expected_effect = prompts::expected_effect(action);
        let prompt = prompts::reflection(&ReflectionPrompt {
            instructions: &target.instructions,
            action,
            expected_effect: &expected_effect,
        });
        let verdict = match self.oracle.reflect(&prompt, before, &after).await {
            Ok(verdict) => verdict,
            Err(e) => {
                run.failed(stage, &check_id, agents::REFLECTION, format!("Reflection failed: {}", e));
                return false;
            }
        };

        if let Some(insight) = verdict.insight.as_deref() {
            if run.memory.remember(insight) {
                debug!(insight, "Insight added to memory");
            }
        }

        let record = |explanation: String| {
            StepRecord::completed(
                check_id.clone(),
                agents::REFLECTION,
                0.0,
                verdict.risk_level,
                verdict.confidence,
                explanation,
            )
        };

        match verdict.status {
            ReflectionStatus::AsExpected => {
                run.log.push(stage, record(verdict.explanation.clone()));
                true
            }
            ReflectionStatus::Recoverable => {
                run.log.push(stage, record(format!("Unexpected, recovering: {}", verdict.explanation)));
                let recovery_id = format!("check_2_recovery_{}", iteration);
                match self.device.perform_action(target.task, &Action::Back).await {
                    Ok(()) => {
                        run.completed(
                            stage,
                            &recovery_id,
                            agents::ACTION,
                            DEVICE_STEP_CONFIDENCE,
                            "Corrective Back - success.".to_string(),
                        );
                        true
                    }
                    Err(e) => {
                        run.failed(stage, &recovery_id, agents::ACTION, format!("Corrective Back failed: {}", e));
                        false
                    }
                }
            }
            ReflectionStatus::Blocking => {
                run.failed(
                    stage,
                    &check_id,
                    agents::REFLECTION,
                    format!("Unexpected, blocking: {}", verdict.explanation),
                );
                false
            }
        }
    }

    /// Final verdict over every record. The returned reasons are always the
    /// run's own records.
    async fn aggregate(&self, run: &mut Run, instructions: &str) -> Result<FinalVerdict, FallbackReason> {
        let prompt = prompts::aggregation(instructions, &run.log).map_err(|e| {
            warn!(error = %e, "Cannot serialize step records");
            FallbackReason::AggregationFailed
        })?;

        let verdict = self.oracle.aggregate(&prompt).await.map_err(|e| {
            warn!(error = %e, "Aggregation failed");
            FallbackReason::AggregationFailed
        })?;

        if !verdict.echoes(&run.log) {
            warn!(
                expected = run.log.len(),
                returned = verdict.echoed_records(),
                "Aggregation did not echo every step record, keeping the recorded steps"
            );
        }

        let record_confidence = run.log.weighted_confidence();
        if (verdict.confidence - record_confidence).abs() > CONFIDENCE_DRIFT {
            warn!(
                oracle_confidence = verdict.confidence,
                record_confidence,
                "Aggregated confidence far from the recorded confidence"
            );
        }

        let reasons = std::mem::take(&mut run.log);
        Ok(FinalVerdict {
            risk_level: verdict.risk_level.or(reasons.combined_risk()),
            confidence: verdict.confidence,
            reasons,
            fallback_reason: None,
        })
    }
}

async fn is_local_file(app_ref: &str) -> bool {
    tokio::fs::metadata(app_ref)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_handle_is_shared() {
        let handle = CancelHandle::new();
        let observer = handle.clone();
        assert!(observer.checkpoint().is_ok());

        handle.cancel();
        assert!(observer.is_cancelled());
        assert_eq!(observer.checkpoint(), Err(FallbackReason::Cancelled));
    }
}
