//! Remote Device Client
//!
//! [`DeviceOps`] over the `/emulator` HTTP surface served by `dynscan-lab`.
//! Each endpoint maps its failures onto the matching [`DeviceError`] class;
//! errors relayed by the service keep their class through the
//! `code` field.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::contracts::emulator::{
    AppRefBody, InitDeviceResponse, InstallResponse, RunAppResponse, ScreenshotResponse, SessionQuery,
    StatusResponse, SwipeBody, TapBody, TaskQuery, TypeBody, UploadResponse, VncUrlResponse,
};
use crate::contracts::Action;
use crate::device::{AppLaunch, DeviceError, DeviceOps, SessionId, TaskId};
use crate::retry::RetryPolicy;

/// Remote device client configuration.
#[derive(Debug, Clone)]
pub struct RemoteDeviceConfig {
    /// Base URL of the device service
    pub base_url: Url,

    pub auth_token: Option<String>,

    /// Request timeout
    pub timeout: Duration,

    /// Retry for unreachable or overloaded service
    pub retry: RetryPolicy,
}

impl Default for RemoteDeviceConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse("http://localhost:8000").expect("Valid default URL"),
            auth_token: None,
            timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
        }
    }
}

impl RemoteDeviceConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, ClientError> {
        let base_url = std::env::var("DEVICE_SERVICE_URL")
            .unwrap_or_else(|_| "http://localhost:8000".to_string());

        let timeout_secs = std::env::var("DEVICE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(120);

        Ok(Self {
            base_url: Url::parse(&base_url).map_err(|e| ClientError::Configuration(e.to_string()))?,
            auth_token: std::env::var("DEVICE_AUTH_TOKEN").ok(),
            timeout: Duration::from_secs(timeout_secs),
            ..Default::default()
        })
    }
}

/// Errors building a client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Outcome of one exchange before it is classified.
#[derive(Debug, Error)]
enum CallError {
    #[error("service unreachable: {0}")]
    Transient(String),

    #[error(transparent)]
    Device(DeviceError),
}

/// Maps an endpoint failure onto its error class.
type Classify = fn(String) -> DeviceError;

#[derive(Clone)]
pub struct RemoteDevice {
    client: Client,
    config: RemoteDeviceConfig,
}

impl RemoteDevice {
    pub fn new(config: RemoteDeviceConfig) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::Configuration(e.to_string()))?;

        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self, ClientError> {
        Self::new(RemoteDeviceConfig::from_env()?)
    }

    pub fn config(&self) -> &RemoteDeviceConfig {
        &self.config
    }

    fn build_url(&self, op: &str, classify: Classify) -> Result<Url, DeviceError> {
        self.config
            .base_url
            .join(&format!("/emulator/{}", op))
            .map_err(|e| classify(e.to_string()))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.config.auth_token {
            Some(ref token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send a request, retrying while the service is unreachable.
    #[instrument(skip(self, classify, build))]
    async fn call<T: DeserializeOwned>(
        &self,
        op: &str,
        classify: Classify,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<T, DeviceError> {
        self.config
            .retry
            .retry(
                op,
                |_| {
                    let request = self.authorize(build());
                    async move { exchange::<T>(request, classify).await }
                },
                |e: &CallError| matches!(e, CallError::Transient(_)),
            )
            .await
            .map_err(|e| match e {
                CallError::Transient(message) => classify(message),
                CallError::Device(err) => err,
            })
    }
}

async fn exchange<T: DeserializeOwned>(request: RequestBuilder, classify: Classify) -> Result<T, CallError> {
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) if e.is_timeout() || e.is_connect() => return Err(CallError::Transient(e.to_string())),
        Err(e) => return Err(CallError::Device(classify(e.to_string()))),
    };

    let status = response.status();
    if matches!(
        status,
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT | StatusCode::TOO_MANY_REQUESTS
    ) {
        return Err(CallError::Transient(format!("status {}", status)));
    }

    let body = response
        .text()
        .await
        .map_err(|e| CallError::Device(classify(e.to_string())))?;
    debug!(%status, len = body.len(), "Device service responded");

    let envelope: Option<StatusResponse> = serde_json::from_str(&body).ok();
    let accepted = envelope.as_ref().map(StatusResponse::is_ok).unwrap_or(false);
    if !status.is_success() || !accepted {
        return Err(CallError::Device(relayed_error(status, envelope, &body, classify)));
    }

    serde_json::from_str(&body)
        .map_err(|e| CallError::Device(classify(format!("unexpected response: {}", e))))
}

fn relayed_error(
    status: StatusCode,
    envelope: Option<StatusResponse>,
    body: &str,
    classify: Classify,
) -> DeviceError {
    let (code, message) = match envelope {
        Some(envelope) => (envelope.code, envelope.message),
        None => (None, None),
    };
    let message = message.unwrap_or_else(|| {
        if body.trim().is_empty() {
            format!("status {}", status)
        } else {
            body.trim().to_string()
        }
    });

    if let Some(err) = code.as_deref().and_then(|code| DeviceError::from_code(code, message.clone())) {
        return err;
    }
    if status == StatusCode::NOT_FOUND {
        return DeviceError::NotFound(message);
    }
    classify(message)
}

fn decode_png(encoded: &str, classify: Classify) -> Result<Vec<u8>, DeviceError> {
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| classify(format!("invalid screenshot encoding: {}", e)))
}

#[async_trait]
impl DeviceOps for RemoteDevice {
    async fn init_device(&self) -> Result<SessionId, DeviceError> {
        let url = self.build_url("init_device", DeviceError::Connection)?;
        let response: InitDeviceResponse = self
            .call("init_device", DeviceError::Connection, || self.client.post(url.clone()))
            .await?;
        info!(session_id = %response.session_id, "Remote device initialized");
        Ok(response.session_id)
    }

    async fn upload_app(&self, path: &Path) -> Result<String, DeviceError> {
        let url = self.build_url("upload_app", DeviceError::Install)?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| DeviceError::Install(format!("invalid artifact path: {}", path.display())))?
            .to_string();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| DeviceError::Install(format!("cannot read {}: {}", path.display(), e)))?;

        let response: UploadResponse = self
            .call("upload_app", DeviceError::Install, || {
                let part = Part::bytes(bytes.clone()).file_name(file_name.clone());
                self.client.post(url.clone()).multipart(Form::new().part("file", part))
            })
            .await?;
        Ok(response.filename)
    }

    async fn install_app(&self, session: SessionId, app_ref: &str) -> Result<String, DeviceError> {
        let url = self.build_url("install_app", DeviceError::Install)?;
        let body = AppRefBody {
            app_ref: app_ref.to_string(),
        };
        let response: InstallResponse = self
            .call("install_app", DeviceError::Install, || {
                self.client
                    .post(url.clone())
                    .query(&SessionQuery { session_id: session })
                    .json(&body)
            })
            .await?;
        Ok(response.package)
    }

    async fn run_app(&self, session: SessionId, app_ref: &str) -> Result<AppLaunch, DeviceError> {
        let url = self.build_url("run_app", DeviceError::Run)?;
        let body = AppRefBody {
            app_ref: app_ref.to_string(),
        };
        let response: RunAppResponse = self
            .call("run_app", DeviceError::Run, || {
                self.client
                    .post(url.clone())
                    .query(&SessionQuery { session_id: session })
                    .json(&body)
            })
            .await?;

        Ok(AppLaunch {
            task_id: response.task_id,
            package: response.package,
            screenshot: decode_png(&response.visuals.screenshot, DeviceError::Run)?,
            events: response.events,
        })
    }

    async fn perform_action(&self, task: TaskId, action: &Action) -> Result<(), DeviceError> {
        let body = match action {
            Action::None => return Ok(()),
            Action::Tap { x, y } => serde_json::to_value(TapBody { x: *x, y: *y }),
            Action::Swipe { x1, y1, x2, y2 } => serde_json::to_value(SwipeBody {
                x1: *x1,
                y1: *y1,
                x2: *x2,
                y2: *y2,
            }),
            Action::Type { text } => serde_json::to_value(TypeBody { text: text.clone() }),
            Action::Back | Action::Home => Ok(serde_json::Value::Null),
        }
        .map_err(|e| DeviceError::Action(e.to_string()))?;

        let op = action.name();
        let url = self.build_url(op, DeviceError::Action)?;
        let _: StatusResponse = self
            .call(op, DeviceError::Action, || {
                let request = self.client.post(url.clone()).query(&TaskQuery { task_id: task });
                if body.is_null() {
                    request
                } else {
                    request.json(&body)
                }
            })
            .await?;
        Ok(())
    }

    async fn capture_screenshot(&self, task: TaskId) -> Result<Vec<u8>, DeviceError> {
        let url = self.build_url("screenshot", DeviceError::Capture)?;
        let response: ScreenshotResponse = self
            .call("screenshot", DeviceError::Capture, || {
                self.client.get(url.clone()).query(&TaskQuery { task_id: task })
            })
            .await?;
        decode_png(&response.screenshot, DeviceError::Capture)
    }

    async fn remote_view_url(&self, task: TaskId) -> Result<Url, DeviceError> {
        let url = self.build_url("get_vnc_url", DeviceError::NotFound)?;
        let response: VncUrlResponse = self
            .call("get_vnc_url", DeviceError::NotFound, || {
                self.client.get(url.clone()).query(&TaskQuery { task_id: task })
            })
            .await?;
        Url::parse(&response.vnc_url)
            .map_err(|e| DeviceError::NotFound(format!("invalid viewer URL {}: {}", response.vnc_url, e)))
    }

    async fn release(&self, session: SessionId) {
        let url = match self.build_url("release", DeviceError::Connection) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Cannot build release URL");
                return;
            }
        };
        let result: Result<StatusResponse, DeviceError> = self
            .call("release", DeviceError::Connection, || {
                self.client
                    .post(url.clone())
                    .query(&SessionQuery { session_id: session })
            })
            .await;
        if let Err(e) = result {
            warn!(session_id = %session, error = %e, "Session release failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use uuid::Uuid;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn device(server: &MockServer) -> RemoteDevice {
        RemoteDevice::new(RemoteDeviceConfig {
            base_url: Url::parse(&server.uri()).unwrap(),
            auth_token: None,
            timeout: Duration::from_secs(5),
            retry: RetryPolicy::fixed(3, Duration::from_millis(1)),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_init_device_returns_session() {
        let server = MockServer::start().await;
        let session_id = Uuid::new_v4();
        Mock::given(method("POST"))
            .and(path("/emulator/init_device"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ok",
                "session_id": session_id,
            })))
            .expect(1)
            .mount(&server)
            .await;

        assert_eq!(device(&server).init_device().await.unwrap(), session_id);
    }

    #[tokio::test]
    async fn test_run_app_decodes_launch_screenshot() {
        let server = MockServer::start().await;
        let session_id = Uuid::new_v4();
        let task_id = Uuid::new_v4();
        Mock::given(method("POST"))
            .and(path("/emulator/run_app"))
            .and(query_param("session_id", session_id.to_string()))
            .and(body_json(serde_json::json!({ "app_ref": "game.apk" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ok",
                "visuals": { "screenshot": STANDARD.encode(b"png-bytes") },
                "events": ["launch", "monkey"],
                "task_id": task_id,
                "package": "com.example.game",
            })))
            .mount(&server)
            .await;

        let launch = device(&server).run_app(session_id, "game.apk").await.unwrap();
        assert_eq!(launch.task_id, task_id);
        assert_eq!(launch.package, "com.example.game");
        assert_eq!(launch.screenshot, b"png-bytes".to_vec());
        assert_eq!(launch.events, vec!["launch", "monkey"]);
    }

    #[tokio::test]
    async fn test_tap_posts_coordinates() {
        let server = MockServer::start().await;
        let task_id = Uuid::new_v4();
        Mock::given(method("POST"))
            .and(path("/emulator/tap"))
            .and(query_param("task_id", task_id.to_string()))
            .and(body_json(serde_json::json!({ "x": 120, "y": 640 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ok",
                "message": "Tap at (120, 640)",
            })))
            .expect(1)
            .mount(&server)
            .await;

        device(&server)
            .perform_action(task_id, &Action::Tap { x: 120, y: 640 })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_none_action_sends_nothing() {
        let server = MockServer::start().await;
        device(&server)
            .perform_action(Uuid::new_v4(), &Action::None)
            .await
            .unwrap();
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn test_relayed_error_keeps_its_class() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/emulator/install_app"))
            .respond_with(ResponseTemplate::new(422).set_body_json(serde_json::json!({
                "status": "error",
                "message": "expected exactly one new package, found 0",
                "code": "DEVICE_INSTALL",
            })))
            .mount(&server)
            .await;

        let err = device(&server)
            .install_app(Uuid::new_v4(), "game.apk")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DeviceError::Install("expected exactly one new package, found 0".to_string())
        );
    }

    #[tokio::test]
    async fn test_action_failure_is_action_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/emulator/back"))
            .respond_with(ResponseTemplate::new(500).set_body_string("adb died"))
            .mount(&server)
            .await;

        let err = device(&server)
            .perform_action(Uuid::new_v4(), &Action::Back)
            .await
            .unwrap_err();
        assert_eq!(err, DeviceError::Action("adb died".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_task_vnc_url_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/emulator/get_vnc_url"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "status": "error",
                "message": "unknown task",
            })))
            .mount(&server)
            .await;

        let err = device(&server).remote_view_url(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, DeviceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_unavailable_service_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/emulator/screenshot"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/emulator/screenshot"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ok",
                "screenshot": STANDARD.encode(b"frame"),
            })))
            .mount(&server)
            .await;

        let bytes = device(&server).capture_screenshot(Uuid::new_v4()).await.unwrap();
        assert_eq!(bytes, b"frame".to_vec());
    }
}
