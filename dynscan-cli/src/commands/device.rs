//! `device` commands
//!
//! Manual control of the device service, one call per command:
//!
//! ```bash
//! dynscan device init
//! dynscan device upload ./game.apk
//! dynscan device install --session <uuid> --app-ref game.apk
//! dynscan device run --session <uuid> --app-ref game.apk --screenshot launch.png
//! dynscan device action --task <uuid> "Tap(120, 640)"
//! dynscan device screenshot --task <uuid> --out screen.png
//! dynscan device vnc-url --task <uuid>
//! dynscan device release --session <uuid>
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};
use serde_json::json;
use uuid::Uuid;

use dynscan_agents::contracts::Action;
use dynscan_agents::DeviceOps;

use crate::context::Context;
use crate::output::{print_field, print_section};

/// Device service commands
#[derive(Debug, Args)]
pub struct DeviceCommands {
    #[command(subcommand)]
    pub command: DeviceSubcommand,
}

#[derive(Debug, Subcommand)]
pub enum DeviceSubcommand {
    /// Lease and connect a device
    Init,

    /// Upload a local app artifact
    Upload {
        /// Artifact path
        file: PathBuf,
    },

    /// Install an uploaded app
    Install {
        #[arg(long)]
        session: Uuid,

        #[arg(long)]
        app_ref: String,
    },

    /// Launch an installed app
    Run {
        #[arg(long)]
        session: Uuid,

        #[arg(long)]
        app_ref: String,

        /// Save the launch screenshot here
        #[arg(long)]
        screenshot: Option<PathBuf>,
    },

    /// Perform a UI action, e.g. "Tap(10, 20)", "Swipe(1,2,3,4)", "Type(hi)", "Back"
    #[command(alias = "act")]
    Action {
        #[arg(long)]
        task: Uuid,

        action: String,
    },

    /// Capture the current screen
    Screenshot {
        #[arg(long)]
        task: Uuid,

        /// PNG output path
        #[arg(long)]
        out: PathBuf,
    },

    /// Print the remote viewer URL
    VncUrl {
        #[arg(long)]
        task: Uuid,
    },

    /// Release a session
    Release {
        #[arg(long)]
        session: Uuid,
    },
}

/// Execute device commands
pub async fn execute(ctx: &Context, cmd: DeviceCommands) -> Result<()> {
    let device = ctx.remote_device()?;

    match cmd.command {
        DeviceSubcommand::Init => {
            let session = device.init_device().await.context("Device init failed")?;
            report(ctx, "Device Session", json!({ "session_id": session }))
        }
        DeviceSubcommand::Upload { file } => {
            let name = device.upload_app(&file).await.context("Upload failed")?;
            report(ctx, "Upload", json!({ "filename": name }))
        }
        DeviceSubcommand::Install { session, app_ref } => {
            let package = device
                .install_app(session, &app_ref)
                .await
                .context("Install failed")?;
            report(ctx, "Install", json!({ "app_ref": app_ref, "package": package }))
        }
        DeviceSubcommand::Run {
            session,
            app_ref,
            screenshot,
        } => {
            let launch = device.run_app(session, &app_ref).await.context("Launch failed")?;
            if let Some(path) = &screenshot {
                save_png(ctx, path, &launch.screenshot)?;
            }
            report(
                ctx,
                "Launch",
                json!({
                    "task_id": launch.task_id,
                    "package": launch.package,
                    "events": launch.events,
                }),
            )
        }
        DeviceSubcommand::Action { task, action } => {
            let action: Action = action.parse().context("Invalid action")?;
            device
                .perform_action(task, &action)
                .await
                .with_context(|| format!("{} failed", action))?;
            report(ctx, "Action", json!({ "task_id": task, "action": action.to_string() }))
        }
        DeviceSubcommand::Screenshot { task, out } => {
            let png = device
                .capture_screenshot(task)
                .await
                .context("Screenshot failed")?;
            save_png(ctx, &out, &png)?;
            report(ctx, "Screenshot", json!({ "path": out, "bytes": png.len() }))
        }
        DeviceSubcommand::VncUrl { task } => {
            let url = device
                .remote_view_url(task)
                .await
                .context("No viewer for task")?;
            report(ctx, "Remote Viewer", json!({ "vnc_url": url }))
        }
        DeviceSubcommand::Release { session } => {
            device.release(session).await;
            report(ctx, "Release", json!({ "session_id": session }))
        }
    }
}

fn save_png(ctx: &Context, path: &Path, png: &[u8]) -> Result<()> {
    std::fs::write(path, png).with_context(|| format!("Failed to write {}", path.display()))?;
    ctx.output.success(&format!("Screenshot saved to {}", path.display()));
    Ok(())
}

/// Print a flat JSON object as JSON or as labelled fields.
fn report(ctx: &Context, title: &str, value: serde_json::Value) -> Result<()> {
    if ctx.output.is_json() {
        return ctx.output.json(&value);
    }

    print_section(title);
    if let Some(fields) = value.as_object() {
        for (name, field) in fields {
            let text = match field {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            print_field(name, &text);
        }
    }
    Ok(())
}
