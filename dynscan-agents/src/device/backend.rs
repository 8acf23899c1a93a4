//! Device Backend
//!
//! The raw command channel to a device. [`AdbBackend`] drives a real device
//! through the `adb` binary; tests substitute scripted backends.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument};

use super::error::DeviceError;

/// Captured output of one device command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Stdout followed by stderr, trimmed.
    pub fn text(&self) -> String {
        let mut text = self.stdout.trim().to_string();
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(stderr);
        }
        text
    }
}

/// Command channel to a device addressed by its `host:port` serial.
///
/// Implementations return `Err` only when the command could not be executed
/// at all; a command that ran and failed is reported through
/// [`CommandOutput::success`].
#[async_trait]
pub trait DeviceBackend: Send + Sync {
    /// Attach to a network device.
    async fn connect(&self, serial: &str) -> Result<CommandOutput, DeviceError>;

    /// Run a shell command on the device.
    async fn shell(&self, serial: &str, args: &[String]) -> Result<CommandOutput, DeviceError>;

    /// Install an artifact from the host.
    async fn install(&self, serial: &str, artifact: &Path) -> Result<CommandOutput, DeviceError>;

    /// PNG bytes of the current screen.
    async fn screencap(&self, serial: &str) -> Result<Vec<u8>, DeviceError>;
}

/// Backend driving devices through the `adb` command line tool.
#[derive(Debug, Clone)]
pub struct AdbBackend {
    adb_path: PathBuf,
    timeout: Duration,
}

impl AdbBackend {
    pub fn new(adb_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            adb_path: adb_path.into(),
            timeout,
        }
    }

    async fn run(&self, args: &[String]) -> Result<std::process::Output, DeviceError> {
        debug!(adb = %self.adb_path.display(), args = ?args, "Running adb command");

        let child = Command::new(&self.adb_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DeviceError::Connection(format!(
                    "failed to spawn {}: {}",
                    self.adb_path.display(),
                    e
                ))
            })?;

        tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                DeviceError::Connection(format!(
                    "adb command timed out after {:.0}s: {}",
                    self.timeout.as_secs_f64(),
                    args.join(" ")
                ))
            })?
            .map_err(|e| DeviceError::Connection(format!("adb command failed: {}", e)))
    }

    async fn run_text(&self, args: Vec<String>) -> Result<CommandOutput, DeviceError> {
        let output = self.run(&args).await?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

fn serial_args(serial: &str, rest: &[&str]) -> Vec<String> {
    let mut args = vec!["-s".to_string(), serial.to_string()];
    args.extend(rest.iter().map(|s| s.to_string()));
    args
}

#[async_trait]
impl DeviceBackend for AdbBackend {
    #[instrument(skip(self))]
    async fn connect(&self, serial: &str) -> Result<CommandOutput, DeviceError> {
        self.run_text(vec!["connect".to_string(), serial.to_string()])
            .await
    }

    #[instrument(skip(self, args))]
    async fn shell(&self, serial: &str, args: &[String]) -> Result<CommandOutput, DeviceError> {
        let mut full = serial_args(serial, &["shell"]);
        full.extend(args.iter().cloned());
        self.run_text(full).await
    }

    #[instrument(skip(self), fields(artifact = %artifact.display()))]
    async fn install(&self, serial: &str, artifact: &Path) -> Result<CommandOutput, DeviceError> {
        let mut args = serial_args(serial, &["install"]);
        args.push(artifact.to_string_lossy().into_owned());
        self.run_text(args).await
    }

    #[instrument(skip(self))]
    async fn screencap(&self, serial: &str) -> Result<Vec<u8>, DeviceError> {
        let output = self
            .run(&serial_args(serial, &["exec-out", "screencap", "-p"]))
            .await
            .map_err(|e| DeviceError::Capture(e.to_string()))?;

        if !output.status.success() || output.stdout.is_empty() {
            return Err(DeviceError::Capture(format!(
                "screencap failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_text_joins_streams() {
        let output = CommandOutput {
            success: false,
            stdout: "Performing Streamed Install\n".to_string(),
            stderr: "Failure [INSTALL_FAILED]\n".to_string(),
        };
        assert_eq!(output.text(), "Performing Streamed Install\nFailure [INSTALL_FAILED]");
        assert_eq!(CommandOutput::ok(" Success ").text(), "Success");
    }

    #[test]
    fn test_serial_args() {
        assert_eq!(
            serial_args("10.0.0.1:5555", &["shell"]),
            vec!["-s", "10.0.0.1:5555", "shell"]
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_connection_error() {
        let backend = AdbBackend::new("/nonexistent/adb-binary", Duration::from_secs(1));
        let result = backend.connect("127.0.0.1:5555").await;
        assert!(matches!(result, Err(DeviceError::Connection(_))));
    }
}
