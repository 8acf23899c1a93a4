//! Shared command context

use anyhow::{Context as _, Result};
use url::Url;

use dynscan_agents::{HttpOracle, OracleClient, OracleConfig, RemoteDevice, RemoteDeviceConfig};

use crate::cli::Cli;
use crate::output::Output;

pub struct Context {
    pub output: Output,
    pub verbose: bool,
    device_url: Option<Url>,
    oracle_url: Option<Url>,
}

impl Context {
    pub fn new(cli: &Cli) -> Result<Self> {
        Ok(Self {
            output: Output::new(cli.output, cli.no_color),
            verbose: cli.verbose,
            device_url: parse_url(cli.device_url.as_deref(), "--device-url")?,
            oracle_url: parse_url(cli.oracle_url.as_deref(), "--oracle-url")?,
        })
    }

    /// Device service client; flags override the environment.
    pub fn remote_device(&self) -> Result<RemoteDevice> {
        let mut config =
            RemoteDeviceConfig::from_env().context("Invalid device service configuration")?;
        if let Some(url) = &self.device_url {
            config.base_url = url.clone();
        }
        RemoteDevice::new(config).context("Failed to create device client")
    }

    /// Decision service client with its configured retry policy.
    pub fn oracle(&self) -> Result<OracleClient<HttpOracle>> {
        let mut config = OracleConfig::from_env().context("Invalid oracle configuration")?;
        if let Some(url) = &self.oracle_url {
            config.base_url = url.clone();
        }
        let retry = config.retry;
        let oracle = HttpOracle::new(config).context("Failed to create oracle client")?;
        Ok(OracleClient::new(oracle, retry))
    }
}

fn parse_url(raw: Option<&str>, flag: &str) -> Result<Option<Url>> {
    raw.map(|value| Url::parse(value).with_context(|| format!("Invalid {}: {}", flag, value)))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_url() {
        assert!(parse_url(None, "--device-url").unwrap().is_none());
        let url = parse_url(Some("http://devices:8000"), "--device-url").unwrap().unwrap();
        assert_eq!(url.host_str(), Some("devices"));
        assert!(parse_url(Some("not a url"), "--device-url").is_err());
    }
}
