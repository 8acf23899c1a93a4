//! Dynscan CLI
//!
//! Command-line interface for dynamic app analysis and manual device
//! control.

use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;
mod context;
mod output;

use cli::{Cli, Commands};
use context::Context;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("dynscan_agents={}", default_level).parse()?)
                .add_directive("warn".parse()?),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let ctx = Context::new(&cli)?;

    match cli.command {
        Commands::Analyze(args) => commands::analyze::execute(&ctx, args).await,
        Commands::Device(cmd) => commands::device::execute(&ctx, cmd).await,
    }
}
