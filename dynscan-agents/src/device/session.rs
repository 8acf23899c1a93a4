//! Device session leasing.
//!
//! A session binds one device endpoint to one analysis run. Sessions are
//! leased on creation and released when the run finishes; an endpoint is never
//! leased twice at the same time. A session nobody has used for the idle
//! timeout is reclaimed on the next lease.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::DeviceError;

pub type SessionId = Uuid;
pub type TaskId = Uuid;

/// A leased device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSession {
    pub session_id: SessionId,
    pub endpoint: String,
    pub serial: String,
    /// app_ref -> discovered package name
    pub package_cache: HashMap<String, String>,
}

/// A launched app, addressed by its task id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHandle {
    pub task_id: TaskId,
    pub session_id: SessionId,
    pub package: String,
}

/// Idle time after which an unused session may be reclaimed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Default)]
struct Registry {
    sessions: HashMap<SessionId, DeviceSession>,
    last_used: HashMap<SessionId, Instant>,
    tasks: HashMap<TaskId, RunHandle>,
}

impl Registry {
    fn touch(&mut self, session_id: SessionId) {
        if self.sessions.contains_key(&session_id) {
            self.last_used.insert(session_id, Instant::now());
        }
    }

    fn remove(&mut self, session_id: SessionId) -> bool {
        self.last_used.remove(&session_id);
        self.tasks.retain(|_, handle| handle.session_id != session_id);
        self.sessions.remove(&session_id).is_some()
    }

    /// Drop sessions idle for longer than `idle_timeout`.
    fn reclaim_idle(&mut self, idle_timeout: Duration) {
        let stale: Vec<SessionId> = self
            .last_used
            .iter()
            .filter(|(_, used)| used.elapsed() > idle_timeout)
            .map(|(id, _)| *id)
            .collect();

        for session_id in stale {
            if let Some(session) = self.sessions.get(&session_id) {
                warn!(session_id = %session_id, endpoint = %session.endpoint, "Reclaiming idle device session");
            }
            self.remove(session_id);
        }
    }
}

/// Mutex-guarded session and task registry.
pub struct SessionManager {
    inner: Mutex<Registry>,
    idle_timeout: Duration,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::with_idle_timeout(DEFAULT_IDLE_TIMEOUT)
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Registry::default()),
            idle_timeout,
        }
    }

    /// Lease the first endpoint that no live session holds.
    pub async fn lease(&self, endpoints: &[String]) -> Result<DeviceSession, DeviceError> {
        let mut registry = self.inner.lock().await;
        registry.reclaim_idle(self.idle_timeout);

        let endpoint = endpoints
            .iter()
            .find(|candidate| {
                !registry
                    .sessions
                    .values()
                    .any(|s| &s.endpoint == *candidate)
            })
            .ok_or_else(|| {
                DeviceError::Connection(format!(
                    "all {} device endpoints are leased",
                    endpoints.len()
                ))
            })?
            .clone();

        let session = DeviceSession {
            session_id: Uuid::new_v4(),
            serial: super::config::endpoint_serial(&endpoint)?,
            endpoint,
            package_cache: HashMap::new(),
        };

        info!(session_id = %session.session_id, endpoint = %session.endpoint, "Leased device session");
        registry
            .sessions
            .insert(session.session_id, session.clone());
        registry.touch(session.session_id);
        Ok(session)
    }

    /// Release a session and every task launched on it. Returns whether it existed.
    pub async fn release(&self, session_id: SessionId) -> bool {
        let existed = self.inner.lock().await.remove(session_id);
        if existed {
            info!(session_id = %session_id, "Released device session");
        }
        existed
    }

    pub async fn session(&self, session_id: SessionId) -> Result<DeviceSession, DeviceError> {
        let mut registry = self.inner.lock().await;
        registry.touch(session_id);
        registry
            .sessions
            .get(&session_id)
            .cloned()
            .ok_or_else(|| DeviceError::NotFound(format!("no such session: {}", session_id)))
    }

    pub async fn cached_package(&self, session_id: SessionId, app_ref: &str) -> Option<String> {
        self.inner
            .lock()
            .await
            .sessions
            .get(&session_id)
            .and_then(|s| s.package_cache.get(app_ref).cloned())
    }

    pub async fn cache_package(&self, session_id: SessionId, app_ref: &str, package: &str) {
        let mut registry = self.inner.lock().await;
        registry.touch(session_id);
        if let Some(session) = registry.sessions.get_mut(&session_id) {
            debug!(session_id = %session_id, app_ref, package, "Caching package name");
            session
                .package_cache
                .insert(app_ref.to_string(), package.to_string());
        }
    }

    /// Register a launched app and hand out its task id.
    pub async fn register_task(
        &self,
        session_id: SessionId,
        package: &str,
    ) -> Result<RunHandle, DeviceError> {
        let mut registry = self.inner.lock().await;
        if !registry.sessions.contains_key(&session_id) {
            return Err(DeviceError::NotFound(format!("no such session: {}", session_id)));
        }
        let handle = RunHandle {
            task_id: Uuid::new_v4(),
            session_id,
            package: package.to_string(),
        };
        registry.tasks.insert(handle.task_id, handle.clone());
        registry.touch(session_id);
        Ok(handle)
    }

    /// Session that owns a task.
    pub async fn task_session(&self, task_id: TaskId) -> Result<DeviceSession, DeviceError> {
        let mut registry = self.inner.lock().await;
        let session = registry
            .tasks
            .get(&task_id)
            .and_then(|handle| registry.sessions.get(&handle.session_id))
            .cloned()
            .ok_or_else(|| DeviceError::NotFound(format!("no such task_id: {}", task_id)))?;
        registry.touch(session.session_id);
        Ok(session)
    }

    pub async fn active_sessions(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }
}
