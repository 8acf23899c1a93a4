//! Device controller configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use super::error::DeviceError;
use crate::retry::RetryPolicy;

/// Device controller configuration.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Path to the `adb` binary
    pub adb_path: PathBuf,

    /// Static device endpoints (`tcp://host:port` or `host:port`)
    pub endpoints: Vec<String>,

    /// JSON file listing provisioned endpoints: `{"emulator": [...]}`
    pub instances_file: Option<PathBuf>,

    /// Directory holding uploaded app artifacts
    pub artifacts_dir: PathBuf,

    /// Remote viewer URL template with `{host}` and `{port}` placeholders
    pub vnc_url_template: String,

    pub vnc_port: u16,

    /// Per-command timeout
    pub command_timeout: Duration,

    /// Activity started by the `am start` launch fallback
    pub fallback_activity: String,

    /// Retry policy for connecting to a device
    pub connect_retry: RetryPolicy,

    /// Retry policy for each UI action dispatch
    pub action_retry: RetryPolicy,

    /// Unused sessions older than this are reclaimed on the next lease
    pub session_idle_timeout: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            adb_path: PathBuf::from("adb"),
            endpoints: Vec::new(),
            instances_file: Some(PathBuf::from("instances.json")),
            artifacts_dir: PathBuf::from("apks"),
            vnc_url_template: "vnc://{host}:{port}".to_string(),
            vnc_port: 5900,
            command_timeout: Duration::from_secs(60),
            fallback_activity: "com.unity3d.player.UnityPlayerActivity".to_string(),
            connect_retry: RetryPolicy::fixed(3, Duration::from_secs(5)),
            action_retry: RetryPolicy::fixed(2, Duration::from_secs(5)),
            session_idle_timeout: super::session::DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl DeviceConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, DeviceError> {
        let defaults = Self::default();

        let endpoints = std::env::var("DEVICE_ENDPOINTS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let vnc_port = match std::env::var("VNC_PORT") {
            Ok(v) => v
                .parse()
                .map_err(|_| DeviceError::Connection(format!("invalid VNC_PORT: {}", v)))?,
            Err(_) => defaults.vnc_port,
        };

        let session_idle_timeout = std::env::var("DEVICE_SESSION_IDLE_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.session_idle_timeout);

        Ok(Self {
            adb_path: std::env::var("ADB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.adb_path),
            endpoints,
            instances_file: std::env::var("DEVICE_INSTANCES_FILE")
                .map(PathBuf::from)
                .ok()
                .or(defaults.instances_file),
            artifacts_dir: std::env::var("APKS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.artifacts_dir),
            vnc_url_template: std::env::var("VNC_URL_TEMPLATE")
                .unwrap_or(defaults.vnc_url_template),
            vnc_port,
            session_idle_timeout,
            ..defaults
        })
    }

    /// Endpoints from the static list, else from the instances file.
    pub fn discover_endpoints(&self) -> Result<Vec<String>, DeviceError> {
        if !self.endpoints.is_empty() {
            return Ok(self.endpoints.clone());
        }

        let endpoints = match &self.instances_file {
            Some(path) if path.exists() => read_instances(path)?,
            _ => Vec::new(),
        };

        if endpoints.is_empty() {
            return Err(DeviceError::Connection(
                "no device endpoints configured".to_string(),
            ));
        }
        Ok(endpoints)
    }
}

#[derive(Debug, Deserialize)]
struct InstancesFile {
    #[serde(default)]
    emulator: Vec<String>,
}

fn read_instances(path: &Path) -> Result<Vec<String>, DeviceError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        DeviceError::Connection(format!("cannot read {}: {}", path.display(), e))
    })?;
    let parsed: InstancesFile = serde_json::from_str(&raw).map_err(|e| {
        DeviceError::Connection(format!("invalid instances file {}: {}", path.display(), e))
    })?;
    Ok(parsed.emulator)
}

/// `host:port` serial from an endpoint such as `tcp://10.0.0.4:5555`.
pub fn endpoint_serial(endpoint: &str) -> Result<String, DeviceError> {
    let host_port = endpoint.rsplit("//").next().unwrap_or(endpoint).trim();
    match host_port.split_once(':') {
        Some((host, port)) if !host.is_empty() && !port.is_empty() => Ok(host_port.to_string()),
        _ => Err(DeviceError::Connection(format!(
            "cannot parse host:port from endpoint: {}",
            endpoint
        ))),
    }
}

/// Host part of an endpoint.
pub fn endpoint_host(endpoint: &str) -> Result<String, DeviceError> {
    let serial = endpoint_serial(endpoint)?;
    Ok(serial
        .split_once(':')
        .map(|(host, _)| host.to_string())
        .unwrap_or(serial))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_endpoint_parsing() {
        assert_eq!(endpoint_serial("tcp://10.0.0.4:5555").unwrap(), "10.0.0.4:5555");
        assert_eq!(endpoint_serial("emu:5555").unwrap(), "emu:5555");
        assert_eq!(endpoint_host("tcp://10.0.0.4:5555").unwrap(), "10.0.0.4");
        assert!(endpoint_serial("tcp://nohost").is_err());
    }

    #[test]
    fn test_static_endpoints_take_precedence() {
        let config = DeviceConfig {
            endpoints: vec!["tcp://a:1".to_string()],
            instances_file: None,
            ..Default::default()
        };
        assert_eq!(config.discover_endpoints().unwrap(), vec!["tcp://a:1"]);
    }

    #[test]
    fn test_instances_file_discovery() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"emulator": ["tcp://10.1.1.1:5555", "tcp://10.1.1.2:5555"]}}"#).unwrap();

        let config = DeviceConfig {
            instances_file: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        assert_eq!(config.discover_endpoints().unwrap().len(), 2);
    }

    #[test]
    fn test_no_endpoints_is_connection_error() {
        let config = DeviceConfig {
            instances_file: None,
            ..Default::default()
        };
        assert!(matches!(
            config.discover_endpoints(),
            Err(DeviceError::Connection(_))
        ));
    }
}
