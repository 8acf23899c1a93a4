//! `/emulator` routes: the device controller over HTTP.
//!
//! Every response carries `status`. Failures answer
//! `{status: "error", message, code}` with the device error code, so a
//! [`RemoteDevice`](dynscan_agents::RemoteDevice) can rebuild the error class.

use std::sync::Arc;

use axum::{
    extract::{Multipart, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::{info, warn};

use dynscan_agents::contracts::emulator::{
    AppRefBody, InitDeviceResponse, InstallResponse, RunAppResponse, ScreenshotResponse,
    SessionQuery, StatusResponse, SwipeBody, TapBody, TaskQuery, TypeBody, UploadResponse,
    Visuals, VncUrlResponse, STATUS_OK,
};
use dynscan_agents::contracts::Action;
use dynscan_agents::device::{DeviceBackend, DeviceController, DeviceError};

type Device<B> = Arc<DeviceController<B>>;

/// Device error rendered as a status envelope.
pub struct ApiError(pub DeviceError);

impl From<DeviceError> for ApiError {
    fn from(e: DeviceError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            // 503 would read as transient to remote clients
            DeviceError::Connection(_) => StatusCode::BAD_GATEWAY,
            DeviceError::Install(_) | DeviceError::Run(_) => StatusCode::UNPROCESSABLE_ENTITY,
            DeviceError::Action(_) | DeviceError::Capture(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DeviceError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(code = self.0.code(), error = %self.0, "Device request failed");
        let body = StatusResponse::error(self.0.code(), self.0.message());
        (self.status(), Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Routes of the device surface, to be nested under `/emulator`.
pub fn router<B, S>(device: Device<B>) -> Router<S>
where
    B: DeviceBackend + 'static,
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/init_device", post(init_device::<B>))
        .route("/upload_app", post(upload_app::<B>))
        .route("/install_app", post(install_app::<B>))
        .route("/run_app", post(run_app::<B>))
        .route("/tap", post(tap::<B>))
        .route("/swipe", post(swipe::<B>))
        .route("/type", post(type_text::<B>))
        .route("/back", post(back::<B>))
        .route("/home", post(home::<B>))
        .route("/screenshot", get(screenshot::<B>))
        .route("/get_vnc_url", get(vnc_url::<B>))
        .route("/release", post(release::<B>))
        .with_state(device)
}

/// Connects on its own task so a caller that gives up mid-connect never
/// leaves a half-initialized lease behind; an unclaimed session idles out.
async fn init_device<B: DeviceBackend + 'static>(
    State(device): State<Device<B>>,
) -> ApiResult<InitDeviceResponse> {
    let session_id = tokio::spawn(async move { device.init_device().await })
        .await
        .map_err(|e| DeviceError::Connection(format!("device init aborted: {}", e)))??;
    Ok(Json(InitDeviceResponse {
        status: STATUS_OK.to_string(),
        session_id,
    }))
}

async fn upload_app<B: DeviceBackend>(
    State(device): State<Device<B>>,
    mut multipart: Multipart,
) -> ApiResult<UploadResponse> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| DeviceError::Install(format!("invalid upload: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| DeviceError::Install("upload has no file name".to_string()))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| DeviceError::Install(format!("upload interrupted: {}", e)))?;

        let outcome = device.store_artifact(&file_name, &bytes).await?;
        let message = if outcome.already_present {
            "File already uploaded"
        } else {
            "File uploaded"
        };
        return Ok(Json(UploadResponse {
            status: STATUS_OK.to_string(),
            filename: outcome.filename,
            message: Some(message.to_string()),
        }));
    }

    Err(DeviceError::Install("missing multipart field `file`".to_string()).into())
}

async fn install_app<B: DeviceBackend>(
    State(device): State<Device<B>>,
    Query(query): Query<SessionQuery>,
    Json(body): Json<AppRefBody>,
) -> ApiResult<InstallResponse> {
    let package = device.install_app(query.session_id, &body.app_ref).await?;
    Ok(Json(InstallResponse {
        status: STATUS_OK.to_string(),
        message: Some(format!("Installed {}", body.app_ref)),
        package,
    }))
}

async fn run_app<B: DeviceBackend>(
    State(device): State<Device<B>>,
    Query(query): Query<SessionQuery>,
    Json(body): Json<AppRefBody>,
) -> ApiResult<RunAppResponse> {
    let launch = device.run_app(query.session_id, &body.app_ref).await?;
    Ok(Json(RunAppResponse {
        status: STATUS_OK.to_string(),
        visuals: Visuals {
            screenshot: STANDARD.encode(&launch.screenshot),
        },
        events: launch.events,
        task_id: launch.task_id,
        package: launch.package,
    }))
}

async fn act<B: DeviceBackend>(
    device: &DeviceController<B>,
    query: TaskQuery,
    action: Action,
) -> ApiResult<StatusResponse> {
    device.perform_action(query.task_id, &action).await?;
    Ok(Json(StatusResponse::ok(format!("{} done", action))))
}

async fn tap<B: DeviceBackend>(
    State(device): State<Device<B>>,
    Query(query): Query<TaskQuery>,
    Json(body): Json<TapBody>,
) -> ApiResult<StatusResponse> {
    act(&device, query, Action::Tap { x: body.x, y: body.y }).await
}

async fn swipe<B: DeviceBackend>(
    State(device): State<Device<B>>,
    Query(query): Query<TaskQuery>,
    Json(body): Json<SwipeBody>,
) -> ApiResult<StatusResponse> {
    let action = Action::Swipe {
        x1: body.x1,
        y1: body.y1,
        x2: body.x2,
        y2: body.y2,
    };
    act(&device, query, action).await
}

async fn type_text<B: DeviceBackend>(
    State(device): State<Device<B>>,
    Query(query): Query<TaskQuery>,
    Json(body): Json<TypeBody>,
) -> ApiResult<StatusResponse> {
    act(&device, query, Action::Type { text: body.text }).await
}

async fn back<B: DeviceBackend>(
    State(device): State<Device<B>>,
    Query(query): Query<TaskQuery>,
) -> ApiResult<StatusResponse> {
    act(&device, query, Action::Back).await
}

async fn home<B: DeviceBackend>(
    State(device): State<Device<B>>,
    Query(query): Query<TaskQuery>,
) -> ApiResult<StatusResponse> {
    act(&device, query, Action::Home).await
}

async fn screenshot<B: DeviceBackend>(
    State(device): State<Device<B>>,
    Query(query): Query<TaskQuery>,
) -> ApiResult<ScreenshotResponse> {
    let png = device.capture_screenshot(query.task_id).await?;
    Ok(Json(ScreenshotResponse {
        status: STATUS_OK.to_string(),
        screenshot: STANDARD.encode(png),
    }))
}

async fn vnc_url<B: DeviceBackend>(
    State(device): State<Device<B>>,
    Query(query): Query<TaskQuery>,
) -> ApiResult<VncUrlResponse> {
    let url = device.remote_view_url(query.task_id).await?;
    Ok(Json(VncUrlResponse {
        status: STATUS_OK.to_string(),
        vnc_url: url.to_string(),
    }))
}

async fn release<B: DeviceBackend>(
    State(device): State<Device<B>>,
    Query(query): Query<SessionQuery>,
) -> ApiResult<StatusResponse> {
    if !device.sessions().release(query.session_id).await {
        return Err(DeviceError::NotFound(format!("unknown session {}", query.session_id)).into());
    }
    info!(session_id = %query.session_id, "Session released over HTTP");
    Ok(Json(StatusResponse::ok("Session released")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use dynscan_agents::device::{CommandOutput, DeviceConfig, DeviceOps};
    use dynscan_agents::{RemoteDevice, RemoteDeviceConfig, RetryPolicy};
    use url::Url;

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 1, 2, 3];

    /// Backend standing in for one emulator with a single installable game.
    #[derive(Default)]
    struct FakeEmulator {
        installed: Mutex<bool>,
        shell: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DeviceBackend for FakeEmulator {
        async fn connect(&self, serial: &str) -> Result<CommandOutput, DeviceError> {
            Ok(CommandOutput::ok(format!("connected to {}", serial)))
        }

        async fn shell(&self, _serial: &str, args: &[String]) -> Result<CommandOutput, DeviceError> {
            let line = args.join(" ");
            self.shell.lock().unwrap().push(line.clone());
            if line.starts_with("pm list packages") {
                let mut listing = "package:/system/app/Settings.apk=com.android.settings\n".to_string();
                if *self.installed.lock().unwrap() {
                    listing.push_str("package:/data/app/com.game-1/base.apk=com.game\n");
                }
                return Ok(CommandOutput::ok(listing));
            }
            if line.starts_with("monkey") {
                return Ok(CommandOutput::ok("Events injected: 1\n// injecting event"));
            }
            Ok(CommandOutput::ok(""))
        }

        async fn install(&self, _serial: &str, _artifact: &Path) -> Result<CommandOutput, DeviceError> {
            *self.installed.lock().unwrap() = true;
            Ok(CommandOutput::ok("Performing Streamed Install\nSuccess"))
        }

        async fn screencap(&self, _serial: &str) -> Result<Vec<u8>, DeviceError> {
            Ok(PNG.to_vec())
        }
    }

    async fn serve(dir: &Path) -> (RemoteDevice, Arc<DeviceController<FakeEmulator>>) {
        let config = DeviceConfig {
            endpoints: vec!["tcp://10.0.0.9:5555".to_string()],
            instances_file: None,
            artifacts_dir: dir.to_path_buf(),
            connect_retry: RetryPolicy::none(),
            action_retry: RetryPolicy::none(),
            ..Default::default()
        };
        let device = Arc::new(DeviceController::new(FakeEmulator::default(), config));
        let app: Router = Router::new().nest("/emulator", router(device.clone()));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let remote = RemoteDevice::new(RemoteDeviceConfig {
            base_url: Url::parse(&format!("http://{}", addr)).unwrap(),
            timeout: Duration::from_secs(5),
            retry: RetryPolicy::none(),
            ..Default::default()
        })
        .unwrap();
        (remote, device)
    }

    #[tokio::test]
    async fn test_full_device_cycle_over_http() {
        let dir = tempfile::tempdir().unwrap();
        let apk = dir.path().join("upload").join("game.apk");
        std::fs::create_dir_all(apk.parent().unwrap()).unwrap();
        std::fs::write(&apk, b"apk bytes").unwrap();

        let store = dir.path().join("apks");
        let (remote, device) = serve(&store).await;

        let session = remote.init_device().await.unwrap();
        let name = remote.upload_app(&apk).await.unwrap();
        assert_eq!(name, "game.apk");
        assert!(store.join("game.apk").is_file());

        let package = remote.install_app(session, &name).await.unwrap();
        assert_eq!(package, "com.game");

        let launch = remote.run_app(session, &name).await.unwrap();
        assert_eq!(launch.package, "com.game");
        assert_eq!(launch.screenshot, PNG);

        remote
            .perform_action(launch.task_id, &Action::Tap { x: 10, y: 20 })
            .await
            .unwrap();
        assert_eq!(remote.capture_screenshot(launch.task_id).await.unwrap(), PNG);

        let viewer = remote.remote_view_url(launch.task_id).await.unwrap();
        assert_eq!(viewer.as_str(), "vnc://10.0.0.9:5900");

        remote.release(session).await;
        assert_eq!(device.sessions().active_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_errors_keep_their_class() {
        let dir = tempfile::tempdir().unwrap();
        let (remote, _device) = serve(dir.path()).await;

        let session = remote.init_device().await.unwrap();
        let err = remote.install_app(session, "missing.apk").await.unwrap_err();
        assert!(matches!(err, DeviceError::Install(_)));

        let err = remote
            .capture_screenshot(uuid::Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::NotFound(_)));
    }
}
