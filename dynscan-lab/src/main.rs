//! Dynscan Lab - Device Control and App Analysis Service
//!
//! # Service Topology
//!
//! Single service exposing:
//! - `/health`, `/ready` - Liveness and readiness probes
//! - `/emulator/*` - Device controller surface (init, upload, install, run,
//!   UI actions, screenshots, viewer URL, release)
//! - `/api/v1/analyze` - Dynamic app analysis, one verdict per request
//!
//! Device sessions are process-local: one service instance owns the device
//! endpoints it is configured with.

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;
use uuid::Uuid;

mod config;
mod routes;

use dynscan_agents::contracts::{AgentError, AnalyzeResponse};
use dynscan_agents::{
    AnalyzeCallRequest, AnalyzeHandler, AppAnalysisAgent, CancelHandle, DeviceConfig,
    DeviceController, EngineConfig, ExplorationEngine, HttpOracle, OracleClient, OracleConfig,
    TelemetryEmitter, ANALYSIS_AGENT_ID, ANALYSIS_AGENT_VERSION,
};

type SharedDevice = Arc<DeviceController>;
type Analyzer = AnalyzeHandler<SharedDevice, HttpOracle>;

/// Application state shared by all routes.
#[derive(Clone)]
pub struct AppState {
    device: SharedDevice,
    analyze: Arc<Analyzer>,
    config: Arc<config::Config>,
}

impl AppState {
    /// Wire the device controller, oracle and engine from the environment.
    pub fn new(config: config::Config) -> Result<Self> {
        let device = Arc::new(DeviceController::adb(DeviceConfig::from_env()?));

        let oracle_config = OracleConfig {
            base_url: Url::parse(&config.oracle_service_url)?,
            ..OracleConfig::from_env()?
        };
        let retry = oracle_config.retry;
        let oracle = OracleClient::new(HttpOracle::new(oracle_config)?, retry);

        let engine_config = EngineConfig::from_env()?;
        engine_config.validate()?;
        info!(
            run_duration_secs = engine_config.run_duration.as_secs(),
            planned_iterations = engine_config.planned_iterations(),
            "Engine configured"
        );

        let telemetry = TelemetryEmitter::with_config(config.telemetry_stdout);
        let engine = ExplorationEngine::new(device.clone(), oracle, engine_config)
            .with_telemetry(telemetry.clone());
        let analyze = Arc::new(AnalyzeHandler::with_components(
            AppAnalysisAgent::new(engine),
            telemetry,
        ));

        Ok(Self {
            device,
            analyze,
            config: Arc::new(config),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::load()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.default_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        service = %config.service_name,
        version = %config.service_version,
        port = config.port,
        platform_env = config.platform_env.as_str(),
        oracle_url = %config.oracle_service_url,
        "Starting dynscan service"
    );

    let state = AppState::new(config.clone())?;

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/v1/analyze", post(analyze))
        .route("/api/v1/analyze", get(analyze_info))
        .nest("/emulator", routes::router(state.device.clone()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(address = %addr, "Server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// =============================================================================
// Health Endpoints
// =============================================================================

/// Liveness probe - always returns OK if the process is running.
async fn health_check() -> &'static str {
    "OK"
}

/// Readiness probe - at least one device endpoint is configured.
async fn readiness_check(State(state): State<AppState>) -> (StatusCode, &'static str) {
    match state.device.config().discover_endpoints() {
        Ok(_) => (StatusCode::OK, "READY"),
        Err(e) => {
            warn!(error = %e, "Not ready");
            (StatusCode::SERVICE_UNAVAILABLE, "NOT_READY")
        }
    }
}

// =============================================================================
// Analysis Endpoints
// =============================================================================

/// Cancels a run whose caller went away.
struct CancelOnDrop(CancelHandle);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// POST /api/v1/analyze - Analyze an app.
///
/// The run executes on its own task so the device session is always
/// released, even when the caller disconnects mid-run.
async fn analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeCallRequest>,
) -> Result<Json<AnalyzeResponse>, (StatusCode, Json<AgentError>)> {
    let cancel = CancelHandle::new();
    let _guard = CancelOnDrop(cancel.clone());
    let handler = state.analyze.clone();

    let run = tokio::spawn(async move { handler.handle(request, &cancel).await });

    match run.await {
        Ok(Ok(response)) => Ok(Json(response)),
        Ok(Err(e)) => Err((StatusCode::BAD_REQUEST, Json(e))),
        Err(e) => {
            error!(error = %e, "Analysis task aborted");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(AgentError {
                    code: "ANALYSIS_INTERNAL".to_string(),
                    message: e.to_string(),
                    request_id: Uuid::new_v4(),
                    details: None,
                }),
            ))
        }
    }
}

/// GET /api/v1/analyze - Get analysis agent info.
async fn analyze_info(State(state): State<AppState>) -> Json<AgentInfoResponse> {
    Json(AgentInfoResponse {
        id: ANALYSIS_AGENT_ID.to_string(),
        version: ANALYSIS_AGENT_VERSION.to_string(),
        classification: "DYNAMIC_APP_ANALYSIS".to_string(),
        endpoint: "/api/v1/analyze".to_string(),
        methods: vec!["POST".to_string()],
        service_version: state.config.service_version.clone(),
    })
}

// =============================================================================
// Response Types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct AgentInfoResponse {
    pub id: String,
    pub version: String,
    pub classification: String,
    pub endpoint: String,
    pub methods: Vec<String>,
    pub service_version: String,
}
