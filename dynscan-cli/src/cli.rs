//! CLI argument parsing

use clap::{Parser, Subcommand};

use crate::commands::{analyze::AnalyzeArgs, device::DeviceCommands};
use crate::output::OutputFormat;

/// Dynscan CLI
///
/// Analyze mobile apps on a virtual device and drive the device service by
/// hand.
#[derive(Parser, Debug)]
#[command(name = "dynscan")]
#[command(version)]
#[command(about = "Dynamic app behavior analysis", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format (table, json)
    #[arg(short, long, global = true, default_value = "table", env = "DYNSCAN_OUTPUT")]
    pub output: OutputFormat,

    /// Device service base URL
    #[arg(long, global = true, env = "DEVICE_SERVICE_URL")]
    pub device_url: Option<String>,

    /// Decision service base URL
    #[arg(long, global = true, env = "ORACLE_SERVICE_URL")]
    pub oracle_url: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a full analysis of one app
    #[command(alias = "scan")]
    Analyze(AnalyzeArgs),

    /// Drive the device service directly
    #[command(alias = "dev")]
    Device(DeviceCommands),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyze_arguments() {
        let cli = Cli::try_parse_from([
            "dynscan",
            "--output",
            "json",
            "analyze",
            "--app-ref",
            "game.apk",
            "--duration-secs",
            "120",
        ])
        .unwrap();

        assert_eq!(cli.output, OutputFormat::Json);
        match cli.command {
            Commands::Analyze(args) => {
                assert_eq!(args.app_ref, "game.apk");
                assert_eq!(args.duration_secs, Some(120));
                assert!(args.instructions.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_device_action_requires_task() {
        assert!(Cli::try_parse_from(["dynscan", "device", "action", "Back"]).is_err());
    }
}
