//! Device error taxonomy.

use thiserror::Error;

/// Errors from device operations, one variant per failure class.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Install error: {0}")]
    Install(String),

    #[error("Run error: {0}")]
    Run(String),

    #[error("Action error: {0}")]
    Action(String),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl DeviceError {
    /// Only connection and action failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Action(_))
    }

    /// Stable code for logs and error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connection(_) => "DEVICE_CONNECTION",
            Self::Install(_) => "DEVICE_INSTALL",
            Self::Run(_) => "DEVICE_RUN",
            Self::Action(_) => "DEVICE_ACTION",
            Self::Capture(_) => "DEVICE_CAPTURE",
            Self::NotFound(_) => "DEVICE_NOT_FOUND",
        }
    }

    /// Inverse of [`code`](Self::code), for errors relayed over HTTP.
    pub fn from_code(code: &str, message: impl Into<String>) -> Option<Self> {
        let message = message.into();
        let err = match code {
            "DEVICE_CONNECTION" => Self::Connection(message),
            "DEVICE_INSTALL" => Self::Install(message),
            "DEVICE_RUN" => Self::Run(message),
            "DEVICE_ACTION" => Self::Action(message),
            "DEVICE_CAPTURE" => Self::Capture(message),
            "DEVICE_NOT_FOUND" => Self::NotFound(message),
            _ => return None,
        };
        Some(err)
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Connection(m)
            | Self::Install(m)
            | Self::Run(m)
            | Self::Action(m)
            | Self::Capture(m)
            | Self::NotFound(m) => m,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classes() {
        assert!(DeviceError::Connection("x".into()).is_retryable());
        assert!(DeviceError::Action("x".into()).is_retryable());
        assert!(!DeviceError::Install("x".into()).is_retryable());
        assert!(!DeviceError::Run("x".into()).is_retryable());
        assert!(!DeviceError::Capture("x".into()).is_retryable());
        assert!(!DeviceError::NotFound("x".into()).is_retryable());
    }

    #[test]
    fn test_code_round_trip() {
        let err = DeviceError::Install("no new package".into());
        assert_eq!(DeviceError::from_code(err.code(), err.message()), Some(err));
        assert_eq!(DeviceError::from_code("BOGUS", "x"), None);
    }
}
