//! Dynamic App Behavior Analysis
//!
//! Installs a mobile app on a virtual device, explores it with
//! vision-guided UI actions and produces a risk verdict backed by every
//! observation made along the way.
//!
//! # Components
//!
//! - **Device Controller** ([`device`]): endpoint leasing, artifact upload,
//!   install with package discovery, launch, UI actions, screenshots and
//!   remote-view lookup over `adb`.
//! - **Oracle Client** ([`oracle`]): vision, reflection and aggregation
//!   calls to an external decision service, parsed strict-then-fallback into
//!   typed results.
//! - **Exploration Engine** ([`engine`]): the `Preparing -> Identifying ->
//!   Exploring -> Aggregating` run under wall-clock, error-budget and caller
//!   cancellation limits.
//!
//! Any failure that prevents analysis resolves to the conservative verdict:
//! risk `high`, confidence `0.5`, with `fallback_reason` set.
//!
//! # Usage
//!
//! ```rust,ignore
//! use dynscan_agents::device::{DeviceConfig, DeviceController};
//! use dynscan_agents::engine::{CancelHandle, EngineConfig, ExplorationEngine};
//! use dynscan_agents::oracle::{HttpOracle, OracleClient, OracleConfig};
//! use dynscan_agents::contracts::AnalyzeRequest;
//!
//! let device = DeviceController::adb(DeviceConfig::from_env()?);
//! let oracle_config = OracleConfig::from_env()?;
//! let oracle = OracleClient::new(HttpOracle::new(oracle_config.clone())?, oracle_config.retry);
//! let engine = ExplorationEngine::new(device, oracle, EngineConfig::from_env()?);
//!
//! let request = AnalyzeRequest::new("/tmp/sample.apk", None);
//! let verdict = engine.analyze(Uuid::new_v4(), &request, &CancelHandle::new()).await;
//! ```
//!
//! # Modules
//!
//! - [`agents`]: agent trait and the app analysis agent
//! - [`contracts`]: step records, verdicts, actions and wire bodies
//! - [`clients`]: remote device client
//! - [`handlers`]: analysis request handler
//! - [`telemetry`]: run lifecycle telemetry

pub mod agents;
pub mod clients;
pub mod contracts;
pub mod device;
pub mod engine;
pub mod handlers;
pub mod oracle;
pub mod retry;
pub mod telemetry;

// Re-export commonly used types
pub use agents::{Agent, AnalysisAgentError, AppAnalysisAgent, ANALYSIS_AGENT_ID, ANALYSIS_AGENT_VERSION};
pub use clients::{ClientError, RemoteDevice, RemoteDeviceConfig};
pub use contracts::{
    Action, AnalyzeRequest, AnalyzeResponse, FallbackReason, FinalVerdict, RiskLevel, Stage, StepLog,
    StepRecord,
};
pub use device::{DeviceConfig, DeviceController, DeviceError, DeviceOps};
pub use engine::{CancelHandle, EngineConfig, ExplorationEngine};
pub use handlers::{AnalyzeCallRequest, AnalyzeHandler};
pub use oracle::{HttpOracle, Oracle, OracleClient, OracleConfig, OracleError};
pub use retry::RetryPolicy;
pub use telemetry::TelemetryEmitter;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
