//! Configuration for the dynscan service
//!
//! Fails fast on missing configuration outside development.
//!
//! Required environment variables (staging/prod):
//! - ORACLE_SERVICE_URL: decision service endpoint (not localhost)
//! - DEVICE_ENDPOINTS or DEVICE_INSTANCES_FILE: where the virtual devices are
//! - PLATFORM_ENV: dev | staging | prod
//!
//! Library settings (ADB_PATH, APKS_DIR, VNC_*, APP_RUN_DURATION_SECS, ...)
//! are read by the library config types themselves.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::env;

/// Platform environment.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlatformEnv {
    #[default]
    Dev,
    Staging,
    Prod,
}

impl PlatformEnv {
    fn from_env() -> Self {
        match env::var("PLATFORM_ENV")
            .unwrap_or_else(|_| "dev".to_string())
            .as_str()
        {
            "prod" => PlatformEnv::Prod,
            "staging" => PlatformEnv::Staging,
            _ => PlatformEnv::Dev,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlatformEnv::Dev => "dev",
            PlatformEnv::Staging => "staging",
            PlatformEnv::Prod => "prod",
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub platform_env: PlatformEnv,

    /// Decision service URL
    pub oracle_service_url: String,

    #[serde(default = "default_service_name")]
    pub service_name: String,

    #[serde(default = "default_service_version")]
    pub service_version: String,

    /// Default tracing level when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Serialize telemetry events as JSON lines
    #[serde(default = "default_telemetry_stdout")]
    pub telemetry_stdout: bool,
}

fn default_port() -> u16 {
    8000
}

fn default_service_name() -> String {
    "dynscan-lab".to_string()
}

fn default_service_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_telemetry_stdout() -> bool {
    true
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In staging/prod every required variable must be set; in dev local
    /// defaults are used.
    pub fn load() -> Result<Self> {
        let platform_env = PlatformEnv::from_env();
        let is_production = platform_env != PlatformEnv::Dev;

        let oracle_service_url = if is_production {
            env::var("ORACLE_SERVICE_URL").map_err(|_| {
                anyhow!(
                    "ORACLE_SERVICE_URL environment variable is required in {} mode. ABORTING STARTUP.",
                    platform_env.as_str()
                )
            })?
        } else {
            env::var("ORACLE_SERVICE_URL").unwrap_or_else(|_| "http://localhost:8003".to_string())
        };

        if is_production
            && env::var("DEVICE_ENDPOINTS").is_err()
            && env::var("DEVICE_INSTANCES_FILE").is_err()
        {
            return Err(anyhow!(
                "DEVICE_ENDPOINTS or DEVICE_INSTANCES_FILE is required in {} mode. ABORTING STARTUP.",
                platform_env.as_str()
            ));
        }

        let config = Self {
            port: env::var("DYNSCAN_PORT")
                .unwrap_or_else(|_| default_port().to_string())
                .parse()
                .unwrap_or(default_port()),
            platform_env,
            oracle_service_url,
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| default_service_name()),
            service_version: env::var("SERVICE_VERSION").unwrap_or_else(|_| default_service_version()),
            log_level: env::var("DYNSCAN_LOG_LEVEL").unwrap_or_else(|_| default_log_level()),
            telemetry_stdout: env::var("TELEMETRY_STDOUT")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
        };

        config.validate_for_production()?;
        Ok(config)
    }

    /// Reject development-only values outside dev.
    pub fn validate_for_production(&self) -> Result<()> {
        if self.platform_env == PlatformEnv::Dev {
            return Ok(());
        }

        if self.oracle_service_url.contains("localhost") {
            return Err(anyhow!(
                "ORACLE_SERVICE_URL cannot be localhost in production. Got: {}",
                self.oracle_service_url
            ));
        }

        Ok(())
    }

    /// Tracing filter used when `RUST_LOG` is unset.
    pub fn default_filter(&self) -> String {
        format!(
            "dynscan_lab={level},dynscan_agents={level},tower_http={level}",
            level = self.log_level
        )
    }
}

impl Default for Config {
    /// Development defaults.
    fn default() -> Self {
        Self {
            port: default_port(),
            platform_env: PlatformEnv::default(),
            oracle_service_url: "http://localhost:8003".to_string(),
            service_name: default_service_name(),
            service_version: default_service_version(),
            log_level: default_log_level(),
            telemetry_stdout: default_telemetry_stdout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.platform_env, PlatformEnv::Dev);
        assert!(config.validate_for_production().is_ok());
    }

    #[test]
    fn test_localhost_oracle_rejected_in_prod() {
        let config = Config {
            platform_env: PlatformEnv::Prod,
            ..Config::default()
        };
        assert!(config.validate_for_production().is_err());
    }

    #[test]
    fn test_default_filter_uses_level() {
        let config = Config {
            log_level: "debug".to_string(),
            ..Config::default()
        };
        assert_eq!(
            config.default_filter(),
            "dynscan_lab=debug,dynscan_agents=debug,tower_http=debug"
        );
    }
}
