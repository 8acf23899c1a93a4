//! The device surface consumed by the exploration engine.
//!
//! Implemented in-process by [`DeviceController`](super::DeviceController)
//! and over HTTP by [`RemoteDevice`](crate::clients::RemoteDevice).

use std::path::Path;

use async_trait::async_trait;
use url::Url;

use super::error::DeviceError;
use super::session::{SessionId, TaskId};
use crate::contracts::Action;

/// Result of launching an app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppLaunch {
    pub task_id: TaskId,
    pub package: String,
    /// PNG taken right after launch
    pub screenshot: Vec<u8>,
    pub events: Vec<String>,
}

/// Result of storing an uploaded artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub filename: String,
    /// Hex SHA-256 of the stored bytes
    pub digest: String,
    /// An identical file was already stored under this name
    pub already_present: bool,
}

#[async_trait]
pub trait DeviceOps: Send + Sync {
    /// Provision or connect a device and lease a session on it.
    async fn init_device(&self) -> Result<SessionId, DeviceError>;

    /// Upload a local artifact. Returns the name to install it by.
    async fn upload_app(&self, path: &Path) -> Result<String, DeviceError>;

    /// Install an app and return its discovered package name.
    async fn install_app(&self, session: SessionId, app_ref: &str) -> Result<String, DeviceError>;

    /// Launch an installed app.
    async fn run_app(&self, session: SessionId, app_ref: &str) -> Result<AppLaunch, DeviceError>;

    async fn perform_action(&self, task: TaskId, action: &Action) -> Result<(), DeviceError>;

    /// PNG bytes of the current screen.
    async fn capture_screenshot(&self, task: TaskId) -> Result<Vec<u8>, DeviceError>;

    async fn remote_view_url(&self, task: TaskId) -> Result<Url, DeviceError>;

    /// Give the session back. Unknown sessions are ignored.
    async fn release(&self, session: SessionId);
}

#[async_trait]
impl<T: DeviceOps + ?Sized> DeviceOps for std::sync::Arc<T> {
    async fn init_device(&self) -> Result<SessionId, DeviceError> {
        (**self).init_device().await
    }

    async fn upload_app(&self, path: &Path) -> Result<String, DeviceError> {
        (**self).upload_app(path).await
    }

    async fn install_app(&self, session: SessionId, app_ref: &str) -> Result<String, DeviceError> {
        (**self).install_app(session, app_ref).await
    }

    async fn run_app(&self, session: SessionId, app_ref: &str) -> Result<AppLaunch, DeviceError> {
        (**self).run_app(session, app_ref).await
    }

    async fn perform_action(&self, task: TaskId, action: &Action) -> Result<(), DeviceError> {
        (**self).perform_action(task, action).await
    }

    async fn capture_screenshot(&self, task: TaskId) -> Result<Vec<u8>, DeviceError> {
        (**self).capture_screenshot(task).await
    }

    async fn remote_view_url(&self, task: TaskId) -> Result<Url, DeviceError> {
        (**self).remote_view_url(task).await
    }

    async fn release(&self, session: SessionId) {
        (**self).release(session).await
    }
}
