//! `analyze` command
//!
//! ```bash
//! dynscan analyze --app-ref ./game.apk
//! dynscan analyze --app-ref game.apk --instructions "Check the login flow" --duration-secs 120
//! dynscan -o json analyze --app-ref com.example.game --save verdict.json
//! ```
//!
//! Ctrl-C cancels the run; the device session is still released and the
//! verdict reflects how far the run got.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context as _, Result};
use clap::Args;
use colored::Colorize;
use comfy_table::{Cell, Color, Table};
use tracing::warn;

use dynscan_agents::contracts::{AnalyzeResponse, FinalVerdict, RiskLevel, StepStatus};
use dynscan_agents::{
    AnalyzeCallRequest, AnalyzeHandler, AnalyzeRequest, AppAnalysisAgent, CancelHandle,
    EngineConfig, ExplorationEngine, TelemetryEmitter,
};

use crate::context::Context;
use crate::output::{print_field, print_section};

/// Arguments for the analyze command
#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Local artifact path, uploaded artifact name or package name
    #[arg(long)]
    pub app_ref: String,

    /// Free-text guidance for the exploration
    #[arg(long)]
    pub instructions: Option<String>,

    /// Exploration duration in seconds (overrides APP_RUN_DURATION_SECS)
    #[arg(long)]
    pub duration_secs: Option<u64>,

    /// Seconds between exploration iterations (overrides APP_CHECK_INTERVAL_SECS)
    #[arg(long)]
    pub interval_secs: Option<u64>,

    /// Skip the post-action reflection step
    #[arg(long)]
    pub no_reflection: bool,

    /// Also write the JSON response to this file
    #[arg(long)]
    pub save: Option<PathBuf>,
}

impl AnalyzeArgs {
    fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = EngineConfig::from_env().context("Invalid engine configuration")?;
        if let Some(secs) = self.duration_secs {
            config.run_duration = Duration::from_secs(secs);
        }
        if let Some(secs) = self.interval_secs {
            config.check_interval = Duration::from_secs(secs);
        }
        if self.no_reflection {
            config.reflection_enabled = false;
        }
        config.validate().context("Invalid engine configuration")?;
        Ok(config)
    }
}

/// Execute the analyze command
pub async fn execute(ctx: &Context, args: AnalyzeArgs) -> Result<()> {
    let config = args.engine_config()?;
    ctx.output.info(&format!(
        "Analyzing {} for {}s (~{} iterations)",
        args.app_ref,
        config.run_duration.as_secs(),
        config.planned_iterations()
    ));

    let telemetry = TelemetryEmitter::with_config(ctx.verbose);
    let engine = ExplorationEngine::new(ctx.remote_device()?, ctx.oracle()?, config)
        .with_telemetry(telemetry.clone());
    let handler = AnalyzeHandler::with_components(AppAnalysisAgent::new(engine), telemetry);

    let cancel = CancelHandle::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, finishing the run");
                cancel.cancel();
            }
        })
    };

    let request = AnalyzeRequest::new(args.app_ref.clone(), args.instructions.clone());
    let result = handler
        .handle(AnalyzeCallRequest::from(request), &cancel)
        .await;
    interrupt.abort();

    let response = result.map_err(|e| anyhow!("{}: {}", e.code, e.message))?;

    if let Some(path) = &args.save {
        let json = serde_json::to_string_pretty(&response).context("Failed to serialize response")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write output to {}", path.display()))?;
        ctx.output.success(&format!("Response written to {}", path.display()));
    }

    if ctx.output.is_json() {
        ctx.output.json(&response)
    } else {
        display_response(&response);
        Ok(())
    }
}

fn display_response(response: &AnalyzeResponse) {
    let verdict = &response.result;

    print_section("Analysis Verdict");
    print_field("Run ID", &response.run_id.to_string());
    let risk = match verdict.risk_level {
        RiskLevel::High => "HIGH".red().bold(),
        RiskLevel::Low => "LOW".green().bold(),
    };
    print_field("Risk", &risk.to_string());
    print_field("Confidence", &format!("{:.2}", verdict.confidence));
    print_field(
        "Duration",
        &format!("{}s", (response.completed_at - response.started_at).num_seconds()),
    );
    if let Some(reason) = verdict.fallback_reason {
        print_field("Fallback", &reason.to_string().yellow().to_string());
    }

    print_section("Step Records");
    println!("{}", records_table(verdict));
}

fn records_table(verdict: &FinalVerdict) -> Table {
    let mut table = Table::new();
    table.set_header(vec![
        Cell::new("Stage").fg(Color::Cyan),
        Cell::new("Check").fg(Color::Cyan),
        Cell::new("Agent").fg(Color::Cyan),
        Cell::new("Risk").fg(Color::Cyan),
        Cell::new("Conf.").fg(Color::Cyan),
        Cell::new("Explanation").fg(Color::Cyan),
    ]);

    for stage in verdict.reasons.stages() {
        for record in verdict.reasons.stage(stage) {
            let risk = match record.risk_level {
                RiskLevel::High => Cell::new("high").fg(Color::Red),
                RiskLevel::Low => Cell::new("low").fg(Color::Green),
            };
            let check = match record.status {
                StepStatus::Error => Cell::new(&record.check_id).fg(Color::Yellow),
                StepStatus::Completed => Cell::new(&record.check_id),
            };
            table.add_row(vec![
                Cell::new(stage.as_str()),
                check,
                Cell::new(&record.agent),
                risk,
                Cell::new(format!("{:.2}", record.confidence)),
                Cell::new(truncate(&record.explanation, 80)),
            ]);
        }
    }

    table
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut short: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    short.push('…');
    short
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynscan_agents::contracts::{FallbackReason, Stage, StepLog, StepRecord};

    #[test]
    fn test_records_table_has_row_per_record() {
        let mut log = StepLog::new();
        log.push(
            Stage::Preparation,
            StepRecord::completed("check_0_init", "emulator_device_init", 0.0, RiskLevel::Low, 0.8, "ok"),
        );
        log.push(
            Stage::Exploration,
            StepRecord::error("check_2_action_1", "emulator_action", "tap failed"),
        );
        let verdict = FinalVerdict::conservative(log, FallbackReason::Cancelled);

        assert_eq!(records_table(&verdict).row_iter().count(), 2);
    }

    #[test]
    fn test_truncate_keeps_short_text() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
    }
}
