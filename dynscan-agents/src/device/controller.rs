//! Device Controller
//!
//! Owns device sessions and turns high-level operations (install, launch,
//! act, capture) into backend commands.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};
use url::Url;

use super::backend::{AdbBackend, CommandOutput, DeviceBackend};
use super::commands;
use super::config::{endpoint_host, DeviceConfig};
use super::error::DeviceError;
use super::ops::{AppLaunch, DeviceOps, UploadOutcome};
use super::packages::{detect_new_package, parse_listing};
use super::session::{SessionId, SessionManager, TaskId};
use crate::contracts::Action;

const MONKEY_MARKER: &str = "injecting event";
const AM_START_MARKER: &str = "Starting:";
const INSTALL_MARKER: &str = "Success";

/// In-process device controller.
pub struct DeviceController<B = AdbBackend> {
    backend: B,
    config: DeviceConfig,
    sessions: SessionManager,
}

impl DeviceController<AdbBackend> {
    /// Controller driving devices through `adb`.
    pub fn adb(config: DeviceConfig) -> Self {
        let backend = AdbBackend::new(config.adb_path.clone(), config.command_timeout);
        Self::new(backend, config)
    }
}

impl<B: DeviceBackend> DeviceController<B> {
    pub fn new(backend: B, config: DeviceConfig) -> Self {
        Self {
            backend,
            sessions: SessionManager::with_idle_timeout(config.session_idle_timeout),
            config,
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Lease an endpoint and connect to it, retrying connection failures.
    #[instrument(skip(self))]
    pub async fn init_device(&self) -> Result<SessionId, DeviceError> {
        self.config
            .connect_retry
            .retry("init_device", |_| self.connect_once(), DeviceError::is_retryable)
            .await
    }

    async fn connect_once(&self) -> Result<SessionId, DeviceError> {
        let endpoints = self.config.discover_endpoints()?;
        let session = self.sessions.lease(&endpoints).await?;

        let result = match self.backend.connect(&session.serial).await {
            Ok(output) if connect_succeeded(&output) => Ok(()),
            Ok(output) => Err(DeviceError::Connection(format!(
                "connect to {} failed: {}",
                session.serial,
                output.text()
            ))),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                info!(session_id = %session.session_id, serial = %session.serial, "Device connected");
                Ok(session.session_id)
            }
            Err(e) => {
                self.sessions.release(session.session_id).await;
                Err(e)
            }
        }
    }

    /// Store an artifact under the artifacts directory.
    ///
    /// Re-uploading identical bytes is accepted; different bytes under an
    /// existing name are a conflict.
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn store_artifact(
        &self,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<UploadOutcome, DeviceError> {
        let name = Path::new(file_name)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| DeviceError::Install(format!("invalid artifact name: {}", file_name)))?
            .to_string();

        let dir = &self.config.artifacts_dir;
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            DeviceError::Install(format!("cannot create {}: {}", dir.display(), e))
        })?;

        let target = dir.join(&name);
        let digest = hex::encode(Sha256::digest(bytes));

        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            let existing = tokio::fs::read(&target).await.map_err(|e| {
                DeviceError::Install(format!("cannot read {}: {}", target.display(), e))
            })?;
            if hex::encode(Sha256::digest(&existing)) == digest {
                info!(filename = %name, "Artifact already present");
                return Ok(UploadOutcome {
                    filename: name,
                    digest,
                    already_present: true,
                });
            }
            return Err(DeviceError::Install(format!(
                "a different file named {} already exists",
                name
            )));
        }

        tokio::fs::write(&target, bytes).await.map_err(|e| {
            DeviceError::Install(format!("cannot write {}: {}", target.display(), e))
        })?;
        info!(filename = %name, digest = %digest, "Artifact stored");

        Ok(UploadOutcome {
            filename: name,
            digest,
            already_present: false,
        })
    }

    /// Absolute path if it exists, else the name under the artifacts directory.
    pub fn resolve_artifact(&self, app_ref: &str) -> Result<PathBuf, DeviceError> {
        let direct = Path::new(app_ref);
        if direct.is_absolute() && direct.is_file() {
            return Ok(direct.to_path_buf());
        }

        let stored = self.config.artifacts_dir.join(app_ref);
        if stored.is_file() {
            return Ok(stored);
        }

        Err(DeviceError::Install(format!("artifact not found: {}", app_ref)))
    }

    async fn installed_packages(&self, serial: &str) -> Result<Vec<String>, DeviceError> {
        let output = self.backend.shell(serial, &commands::list_packages()).await?;
        if !output.success {
            return Err(DeviceError::Install(format!(
                "package listing failed: {}",
                output.text()
            )));
        }
        Ok(parse_listing(&output.stdout))
    }

    /// Install an app and discover its package name by diffing package listings.
    #[instrument(skip(self, session_id), fields(session_id = %session_id))]
    pub async fn install_app(&self, session_id: SessionId, app_ref: &str) -> Result<String, DeviceError> {
        let app_ref = app_ref.trim();
        if app_ref.is_empty() {
            return Err(DeviceError::Install("app_ref must not be empty".to_string()));
        }

        let session = self.sessions.session(session_id).await?;

        if let Some(package) = self.sessions.cached_package(session_id, app_ref).await {
            info!(package = %package, "Using cached package name");
            return Ok(package);
        }

        let artifact = self.resolve_artifact(app_ref)?;
        let before = self.installed_packages(&session.serial).await?;

        let output = self.backend.install(&session.serial, &artifact).await?;
        let text = output.text();
        if !text.contains(INSTALL_MARKER) {
            return Err(DeviceError::Install(format!(
                "failed to install {}, output: {}",
                app_ref, text
            )));
        }

        let after = self.installed_packages(&session.serial).await?;
        let package = detect_new_package(&before, &after)?;

        self.sessions.cache_package(session_id, app_ref, &package).await;
        info!(package = %package, "App installed");
        Ok(package)
    }

    /// Launch via event injection, falling back to an explicit activity start.
    async fn launch(&self, serial: &str, package: &str) -> Result<&'static str, DeviceError> {
        let monkey = self
            .backend
            .shell(serial, &commands::monkey_launch(package))
            .await?;
        if monkey.text().to_lowercase().contains(MONKEY_MARKER) {
            return Ok("monkey");
        }

        warn!(package, "Monkey launch failed, trying am start");
        let start = self
            .backend
            .shell(
                serial,
                &commands::activity_launch(package, &self.config.fallback_activity),
            )
            .await?;
        if start.text().contains(AM_START_MARKER) {
            return Ok("am_start");
        }

        Err(DeviceError::Run(format!(
            "failed to launch {}: {}",
            package,
            start.text()
        )))
    }

    /// Launch an app. `app_ref` is looked up in the session's package cache
    /// and otherwise taken as a package name.
    #[instrument(skip(self, session_id), fields(session_id = %session_id))]
    pub async fn run_app(&self, session_id: SessionId, app_ref: &str) -> Result<AppLaunch, DeviceError> {
        let session = self.sessions.session(session_id).await?;
        let package = self
            .sessions
            .cached_package(session_id, app_ref)
            .await
            .unwrap_or_else(|| app_ref.trim().to_string());

        let method = self.launch(&session.serial, &package).await?;

        let screenshot = self
            .backend
            .screencap(&session.serial)
            .await
            .map_err(|e| DeviceError::Run(format!("launch screenshot failed: {}", e)))?;

        let handle = self.sessions.register_task(session_id, &package).await?;
        info!(task_id = %handle.task_id, package = %package, method, "App launched");

        Ok(AppLaunch {
            task_id: handle.task_id,
            package,
            screenshot,
            events: vec!["launch".to_string(), method.to_string()],
        })
    }

    async fn dispatch(&self, serial: &str, lines: &[Vec<String>]) -> Result<(), DeviceError> {
        for line in lines {
            let output = self
                .backend
                .shell(serial, line)
                .await
                .map_err(|e| DeviceError::Action(e.to_string()))?;
            if !output.success {
                return Err(DeviceError::Action(format!(
                    "`{}` failed: {}",
                    line.join(" "),
                    output.text()
                )));
            }
        }
        Ok(())
    }

    /// Execute a UI action, retrying the dispatch per the action policy.
    #[instrument(skip(self, task_id, action), fields(task_id = %task_id, action = %action))]
    pub async fn perform_action(&self, task_id: TaskId, action: &Action) -> Result<(), DeviceError> {
        if action.is_none() {
            return Ok(());
        }
        let session = self.sessions.task_session(task_id).await?;
        let lines = commands::action_commands(action);

        self.config
            .action_retry
            .retry(
                action.name(),
                |_| self.dispatch(&session.serial, &lines),
                DeviceError::is_retryable,
            )
            .await
    }

    /// Current screen as PNG bytes. Not retried.
    #[instrument(skip(self, task_id), fields(task_id = %task_id))]
    pub async fn capture_screenshot(&self, task_id: TaskId) -> Result<Vec<u8>, DeviceError> {
        let session = self.sessions.task_session(task_id).await?;
        self.backend
            .screencap(&session.serial)
            .await
            .map_err(|e| match e {
                DeviceError::Capture(_) => e,
                other => DeviceError::Capture(other.to_string()),
            })
    }

    /// Viewer URL for the device behind a task.
    pub async fn remote_view_url(&self, task_id: TaskId) -> Result<Url, DeviceError> {
        let session = self.sessions.task_session(task_id).await?;
        let host = endpoint_host(&session.endpoint)?;
        let raw = self
            .config
            .vnc_url_template
            .replace("{host}", &host)
            .replace("{port}", &self.config.vnc_port.to_string());
        Url::parse(&raw).map_err(|e| DeviceError::NotFound(format!("invalid viewer url {}: {}", raw, e)))
    }

    pub async fn release(&self, session_id: SessionId) {
        self.sessions.release(session_id).await;
    }
}

fn connect_succeeded(output: &CommandOutput) -> bool {
    let text = output.text().to_lowercase();
    output.success
        && text.contains("connected")
        && !text.contains("failed")
        && !text.contains("cannot")
        && !text.contains("unable")
}

#[async_trait]
impl<B: DeviceBackend> DeviceOps for DeviceController<B> {
    async fn init_device(&self) -> Result<SessionId, DeviceError> {
        DeviceController::init_device(self).await
    }

    async fn upload_app(&self, path: &Path) -> Result<String, DeviceError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            DeviceError::Install(format!("cannot read {}: {}", path.display(), e))
        })?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| DeviceError::Install(format!("invalid artifact path: {}", path.display())))?;
        Ok(self.store_artifact(name, &bytes).await?.filename)
    }

    async fn install_app(&self, session: SessionId, app_ref: &str) -> Result<String, DeviceError> {
        DeviceController::install_app(self, session, app_ref).await
    }

    async fn run_app(&self, session: SessionId, app_ref: &str) -> Result<AppLaunch, DeviceError> {
        DeviceController::run_app(self, session, app_ref).await
    }

    async fn perform_action(&self, task: TaskId, action: &Action) -> Result<(), DeviceError> {
        DeviceController::perform_action(self, task, action).await
    }

    async fn capture_screenshot(&self, task: TaskId) -> Result<Vec<u8>, DeviceError> {
        DeviceController::capture_screenshot(self, task).await
    }

    async fn remote_view_url(&self, task: TaskId) -> Result<Url, DeviceError> {
        DeviceController::remote_view_url(self, task).await
    }

    async fn release(&self, session: SessionId) {
        DeviceController::release(self, session).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::retry::RetryPolicy;

    /// Backend replaying scripted shell outputs and recording every call.
    #[derive(Default)]
    struct ScriptedBackend {
        connect: Mutex<VecDeque<Result<CommandOutput, DeviceError>>>,
        shell: Mutex<VecDeque<Result<CommandOutput, DeviceError>>>,
        install: Mutex<VecDeque<CommandOutput>>,
        screencap: Mutex<VecDeque<Result<Vec<u8>, DeviceError>>>,
        connect_delay: Mutex<Option<Duration>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        fn push_shell(&self, out: CommandOutput) {
            self.shell.lock().unwrap().push_back(Ok(out));
        }
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DeviceBackend for ScriptedBackend {
        async fn connect(&self, serial: &str) -> Result<CommandOutput, DeviceError> {
            self.calls.lock().unwrap().push(format!("connect {}", serial));
            let delay = *self.connect_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.connect
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(CommandOutput::ok(format!("connected to {}", serial))))
        }

        async fn shell(&self, _serial: &str, args: &[String]) -> Result<CommandOutput, DeviceError> {
            self.calls.lock().unwrap().push(args.join(" "));
            self.shell
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(CommandOutput::ok("")))
        }

        async fn install(&self, _serial: &str, artifact: &Path) -> Result<CommandOutput, DeviceError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("install {}", artifact.display()));
            Ok(self
                .install
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| CommandOutput::ok("Success")))
        }

        async fn screencap(&self, _serial: &str) -> Result<Vec<u8>, DeviceError> {
            self.screencap
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(vec![0x89, b'P', b'N', b'G']))
        }
    }

    fn controller(dir: &Path) -> DeviceController<ScriptedBackend> {
        let config = DeviceConfig {
            endpoints: vec!["tcp://10.0.0.9:5555".to_string()],
            instances_file: None,
            artifacts_dir: dir.to_path_buf(),
            connect_retry: RetryPolicy::fixed(3, Duration::from_millis(1)),
            action_retry: RetryPolicy::fixed(2, Duration::from_millis(1)),
            session_idle_timeout: Duration::from_secs(60),
            ..Default::default()
        };
        DeviceController::new(ScriptedBackend::default(), config)
    }

    const BASE: &str = "package:/system/app/Settings.apk=com.android.settings\n";
    const WITH_APP: &str =
        "package:/system/app/Settings.apk=com.android.settings\npackage:/data/app/~~a==/com.game-1/base.apk=com.game\n";

    #[tokio::test]
    async fn test_init_device_retries_failed_connect() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = controller(dir.path());
        ctl.backend
            .connect
            .lock()
            .unwrap()
            .push_back(Ok(CommandOutput::ok("failed to connect to 10.0.0.9:5555")));

        let session = ctl.init_device().await.unwrap();
        assert_eq!(ctl.sessions.active_sessions().await, 1);
        assert!(ctl.sessions.session(session).await.is_ok());
        assert_eq!(
            ctl.backend.calls().iter().filter(|c| c.starts_with("connect")).count(),
            2
        );
    }

    #[tokio::test]
    async fn test_init_device_exhausts_retries() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = controller(dir.path());
        for _ in 0..3 {
            ctl.backend
                .connect
                .lock()
                .unwrap()
                .push_back(Err(DeviceError::Connection("refused".to_string())));
        }

        assert!(matches!(ctl.init_device().await, Err(DeviceError::Connection(_))));
        assert_eq!(ctl.sessions.active_sessions().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_abandoned_mid_connect_frees_endpoint_after_idle_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = controller(dir.path());
        *ctl.backend.connect_delay.lock().unwrap() = Some(Duration::from_secs(300));

        let abandoned = tokio::time::timeout(Duration::from_secs(5), ctl.init_device()).await;
        assert!(abandoned.is_err());
        assert_eq!(ctl.sessions.active_sessions().await, 1);

        *ctl.backend.connect_delay.lock().unwrap() = None;
        assert!(matches!(ctl.init_device().await, Err(DeviceError::Connection(_))));

        tokio::time::advance(Duration::from_secs(61)).await;
        let session = ctl.init_device().await.unwrap();
        assert_eq!(ctl.sessions.active_sessions().await, 1);
        assert!(ctl.sessions.session(session).await.is_ok());
    }

    #[tokio::test]
    async fn test_install_discovers_and_caches_package() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("game.apk"), b"apk").unwrap();
        let ctl = controller(dir.path());
        let session = ctl.init_device().await.unwrap();

        ctl.backend.push_shell(CommandOutput::ok(BASE));
        ctl.backend.push_shell(CommandOutput::ok(WITH_APP));

        assert_eq!(ctl.install_app(session, "game.apk").await.unwrap(), "com.game");

        let installs_before = ctl.backend.calls().len();
        assert_eq!(ctl.install_app(session, "game.apk").await.unwrap(), "com.game");
        assert_eq!(ctl.backend.calls().len(), installs_before);
    }

    #[tokio::test]
    async fn test_install_requires_success_marker() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("game.apk"), b"apk").unwrap();
        let ctl = controller(dir.path());
        let session = ctl.init_device().await.unwrap();

        ctl.backend.push_shell(CommandOutput::ok(BASE));
        ctl.backend
            .install
            .lock()
            .unwrap()
            .push_back(CommandOutput::failed("Failure [INSTALL_FAILED_INVALID_APK]"));

        let err = ctl.install_app(session, "game.apk").await.unwrap_err();
        assert!(matches!(err, DeviceError::Install(_)));
        assert!(err.to_string().contains("INSTALL_FAILED_INVALID_APK"));
    }

    #[tokio::test]
    async fn test_install_with_unchanged_listing_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("game.apk"), b"apk").unwrap();
        let ctl = controller(dir.path());
        let session = ctl.init_device().await.unwrap();

        ctl.backend.push_shell(CommandOutput::ok(BASE));
        ctl.backend.push_shell(CommandOutput::ok(BASE));

        assert!(matches!(
            ctl.install_app(session, "game.apk").await,
            Err(DeviceError::Install(_))
        ));
    }

    #[tokio::test]
    async fn test_install_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = controller(dir.path());
        let session = ctl.init_device().await.unwrap();
        assert!(matches!(
            ctl.install_app(session, "absent.apk").await,
            Err(DeviceError::Install(_))
        ));
    }

    #[tokio::test]
    async fn test_run_app_falls_back_to_am_start() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = controller(dir.path());
        let session = ctl.init_device().await.unwrap();

        ctl.backend.push_shell(CommandOutput::ok("** No activities found to run, monkey aborted."));
        ctl.backend
            .push_shell(CommandOutput::ok("Starting: Intent { cmp=com.game/.Main }"));

        let launch = ctl.run_app(session, "com.game").await.unwrap();
        assert_eq!(launch.package, "com.game");
        assert_eq!(launch.events, vec!["launch", "am_start"]);
        assert!(!launch.screenshot.is_empty());
    }

    #[tokio::test]
    async fn test_run_app_fails_when_both_launches_fail() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = controller(dir.path());
        let session = ctl.init_device().await.unwrap();

        ctl.backend.push_shell(CommandOutput::ok("monkey aborted"));
        ctl.backend.push_shell(CommandOutput::ok("Error: Activity class does not exist"));

        assert!(matches!(
            ctl.run_app(session, "com.game").await,
            Err(DeviceError::Run(_))
        ));
    }

    #[tokio::test]
    async fn test_action_retried_once() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = controller(dir.path());
        let session = ctl.init_device().await.unwrap();
        ctl.backend.push_shell(CommandOutput::ok(":Monkey: injecting event"));
        let task = ctl.run_app(session, "com.game").await.unwrap().task_id;

        ctl.backend.push_shell(CommandOutput::failed("device offline"));
        ctl.backend.push_shell(CommandOutput::ok(""));

        ctl.perform_action(task, &Action::Tap { x: 1, y: 2 }).await.unwrap();
        let taps = ctl
            .backend
            .calls()
            .iter()
            .filter(|c| c.as_str() == "input tap 1 2")
            .count();
        assert_eq!(taps, 2);
    }

    #[tokio::test]
    async fn test_action_fails_after_two_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = controller(dir.path());
        let session = ctl.init_device().await.unwrap();
        ctl.backend.push_shell(CommandOutput::ok(":Monkey: injecting event"));
        let task = ctl.run_app(session, "com.game").await.unwrap().task_id;

        ctl.backend.push_shell(CommandOutput::failed("offline"));
        ctl.backend.push_shell(CommandOutput::failed("offline"));
        ctl.backend.push_shell(CommandOutput::ok(""));

        assert!(matches!(
            ctl.perform_action(task, &Action::Back).await,
            Err(DeviceError::Action(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_task_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = controller(dir.path());
        let unknown = uuid::Uuid::new_v4();
        assert!(matches!(
            ctl.remote_view_url(unknown).await,
            Err(DeviceError::NotFound(_))
        ));
        assert!(matches!(
            ctl.perform_action(unknown, &Action::Home).await,
            Err(DeviceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_remote_view_url_from_template() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = controller(dir.path());
        let session = ctl.init_device().await.unwrap();
        ctl.backend.push_shell(CommandOutput::ok("injecting event"));
        let task = ctl.run_app(session, "com.game").await.unwrap().task_id;

        let url = ctl.remote_view_url(task).await.unwrap();
        assert_eq!(url.as_str(), "vnc://10.0.0.9:5900");
    }

    #[tokio::test]
    async fn test_store_artifact_dedups_by_digest() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = controller(dir.path());

        let first = ctl.store_artifact("game.apk", b"payload").await.unwrap();
        assert!(!first.already_present);

        let again = ctl.store_artifact("game.apk", b"payload").await.unwrap();
        assert!(again.already_present);
        assert_eq!(again.digest, first.digest);

        assert!(matches!(
            ctl.store_artifact("game.apk", b"other").await,
            Err(DeviceError::Install(_))
        ));
    }

    #[tokio::test]
    async fn test_store_artifact_strips_directories() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = controller(dir.path());
        let outcome = ctl.store_artifact("../../etc/game.apk", b"x").await.unwrap();
        assert_eq!(outcome.filename, "game.apk");
        assert!(dir.path().join("game.apk").exists());
    }
}
