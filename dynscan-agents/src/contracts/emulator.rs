//! Device Service Contracts
//!
//! Request and response bodies of the `/emulator` HTTP surface. Every
//! response carries `status`; failures carry `message` and a device error
//! `code`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const STATUS_OK: &str = "ok";
pub const STATUS_ERROR: &str = "error";

/// Envelope shared by every response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusResponse {
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Device error code on failure (e.g. `DEVICE_INSTALL`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl StatusResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: STATUS_OK.to_string(),
            message: Some(message.into()),
            code: None,
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self {
            status: STATUS_ERROR.to_string(),
            message: Some(message.into()),
            code: Some(code.to_string()),
        }
    }

    /// The service historically answered `ok` or `success`.
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK || self.status == "success"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitDeviceResponse {
    pub status: String,
    pub session_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub status: String,
    pub filename: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppRefBody {
    pub app_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallResponse {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    pub package: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Visuals {
    /// Base64 PNG
    pub screenshot: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunAppResponse {
    pub status: String,
    pub visuals: Visuals,
    #[serde(default)]
    pub events: Vec<String>,
    pub task_id: Uuid,
    pub package: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TapBody {
    pub x: u32,
    pub y: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SwipeBody {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeBody {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotResponse {
    pub status: String,
    /// Base64 PNG
    pub screenshot: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VncUrlResponse {
    pub status: String,
    pub vnc_url: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SessionQuery {
    pub session_id: Uuid,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TaskQuery {
    pub task_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_envelope_accepts_success() {
        let body: StatusResponse = serde_json::from_str(r#"{"status":"success"}"#).unwrap();
        assert!(body.is_ok());

        let body: StatusResponse =
            serde_json::from_str(r#"{"status":"error","message":"boom","code":"DEVICE_RUN"}"#).unwrap();
        assert!(!body.is_ok());
        assert_eq!(body.code.as_deref(), Some("DEVICE_RUN"));
    }

    #[test]
    fn test_ok_envelope_omits_code() {
        let json = serde_json::to_string(&StatusResponse::ok("Tap at (1, 2)")).unwrap();
        assert_eq!(json, r#"{"status":"ok","message":"Tap at (1, 2)"}"#);
    }
}
