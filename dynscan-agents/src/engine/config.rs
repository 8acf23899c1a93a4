//! Exploration engine configuration.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },

    #[error("Configuration error: {0}")]
    Inconsistent(String),
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Wall-clock length of the exploration stage
    pub run_duration: Duration,

    /// Spacing between exploration iterations
    pub check_interval: Duration,

    pub max_total_errors: u32,
    pub max_consecutive_errors: u32,

    /// Ask the reflection oracle whether each action had its expected effect
    pub reflection_enabled: bool,

    /// Feed accumulated insights back into exploration prompts
    pub memory_enabled: bool,

    /// Retry for init, upload and install
    pub preparation_retry: RetryPolicy,

    /// Retry for launching the app
    pub run_app_retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            run_duration: Duration::from_secs(5 * 60),
            check_interval: Duration::from_secs(60),
            max_total_errors: 15,
            max_consecutive_errors: 3,
            reflection_enabled: true,
            memory_enabled: true,
            preparation_retry: RetryPolicy::fixed(3, Duration::from_secs(30)),
            run_app_retry: RetryPolicy::fixed(2, Duration::from_secs(60)),
        }
    }
}

fn env_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(default),
    }
}

fn env_flag(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid { name, value }),
        },
        Err(_) => Ok(default),
    }
}

impl EngineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            run_duration: Duration::from_secs(env_or(
                "APP_RUN_DURATION_SECS",
                defaults.run_duration.as_secs(),
            )?),
            check_interval: Duration::from_secs(env_or(
                "APP_CHECK_INTERVAL_SECS",
                defaults.check_interval.as_secs(),
            )?),
            max_total_errors: env_or("MAX_TOTAL_ERRORS", defaults.max_total_errors)?,
            max_consecutive_errors: env_or("MAX_CONSECUTIVE_ERRORS", defaults.max_consecutive_errors)?,
            reflection_enabled: env_flag("REFLECTION_ENABLED", defaults.reflection_enabled)?,
            memory_enabled: env_flag("MEMORY_ENABLED", defaults.memory_enabled)?,
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.check_interval.is_zero() {
            return Err(ConfigError::Inconsistent(
                "check interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Iterations the exploration stage expects to run.
    pub fn planned_iterations(&self) -> u32 {
        self.run_duration
            .as_nanos()
            .checked_div(self.check_interval.as_nanos())
            .map_or(0, |planned| u32::try_from(planned).unwrap_or(u32::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.planned_iterations(), 5);
        assert_eq!(config.max_total_errors, 15);
        assert_eq!(config.max_consecutive_errors, 3);
        assert_eq!(config.preparation_retry.max_attempts, 3);
        assert_eq!(config.run_app_retry.max_attempts, 2);
        assert!(config.reflection_enabled && config.memory_enabled);
    }

    #[test]
    fn test_sub_millisecond_interval_is_planned() {
        let config = EngineConfig {
            run_duration: Duration::from_millis(2),
            check_interval: Duration::from_micros(500),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.planned_iterations(), 4);

        let zero = EngineConfig {
            check_interval: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(zero.planned_iterations(), 0);
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let config = EngineConfig {
            check_interval: Duration::ZERO,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(config.planned_iterations(), 0);
    }
}
