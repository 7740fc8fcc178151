//! Helper command - privileged helper status and installation.

use std::path::PathBuf;

use anyhow::{Context as _, Result, anyhow, bail};
use caretaker_helper::{HelperClient, HelperInstallation, InstallStatus, platform_authorizer};
use clap::{Args, Subcommand};
use console::{Style, style};
use serde::Serialize;

use super::Context;

/// Name of the helper binary shipped next to the CLI.
const HELPER_BINARY: &str = "caretaker-helper";

/// Arguments for the helper command.
#[derive(Args, Debug)]
pub struct HelperArgs {
    #[command(subcommand)]
    pub command: HelperCommand,
}

#[derive(Subcommand, Debug)]
pub enum HelperCommand {
    /// Show whether the helper is installed, current and reachable
    Status,

    /// Install or upgrade the helper (prompts for administrator rights)
    Install {
        /// Helper binary to install; default: caretaker-helper next to this executable
        #[arg(long)]
        binary: Option<PathBuf>,
    },
}

#[derive(Debug, Serialize)]
struct HelperStatusOutput {
    service_name: String,
    required_version: String,
    socket: PathBuf,
    status: InstallStatus,
    reachable: Option<bool>,
    running_version: Option<String>,
}

/// Run the helper command.
pub async fn run(args: HelperArgs, ctx: &Context) -> Result<()> {
    let config = ctx.load_config()?.config;
    let installation = HelperInstallation::from_config(&config.helper());

    match args.command {
        HelperCommand::Status => cmd_status(&installation, ctx).await,
        HelperCommand::Install { binary } => cmd_install(&installation, binary, ctx).await,
    }
}

async fn cmd_status(installation: &HelperInstallation, ctx: &Context) -> Result<()> {
    let status = installation.status();
    let (reachable, running_version) = match status {
        InstallStatus::NotInstalled => (None, None),
        _ => {
            let client = HelperClient::new(installation.socket_path.clone());
            match client.connect().await {
                Ok(version) => (Some(true), Some(version)),
                Err(e) => {
                    tracing::debug!(error = %e, "Helper not reachable");
                    (Some(false), None)
                }
            }
        }
    };

    let output = HelperStatusOutput {
        service_name: installation.service_name.clone(),
        required_version: installation.required_version.clone(),
        socket: installation.socket_path.clone(),
        status,
        reachable,
        running_version,
    };
    if ctx.json_output {
        return ctx.print_json(&output);
    }

    let dim = Style::new().dim();
    println!();
    println!("{}", style("Privileged Helper").bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    let line = match &output.status {
        InstallStatus::NotInstalled => Style::new().red().apply_to("● not installed".to_string()),
        InstallStatus::Current { version } => {
            Style::new().green().apply_to(format!("● installed ({version})"))
        }
        InstallStatus::Outdated {
            installed,
            required,
        } => Style::new()
            .yellow()
            .apply_to(format!("● outdated ({installed}, requires {required})")),
    };
    println!("  {} {}", dim.apply_to("Status:   "), line);
    println!("  {} {}", dim.apply_to("Service:  "), output.service_name);
    println!("  {} {}", dim.apply_to("Socket:   "), output.socket.display());
    match output.reachable {
        Some(true) => println!(
            "  {} {}",
            dim.apply_to("Running:  "),
            output.running_version.as_deref().unwrap_or("yes")
        ),
        Some(false) => println!(
            "  {} {}",
            dim.apply_to("Running:  "),
            Style::new().red().apply_to("not reachable")
        ),
        None => {}
    }
    if !matches!(output.status, InstallStatus::Current { .. }) {
        println!();
        println!("  {}", dim.apply_to("Install with: caretaker helper install"));
    }
    println!();
    Ok(())
}

async fn cmd_install(
    installation: &HelperInstallation,
    binary: Option<PathBuf>,
    ctx: &Context,
) -> Result<()> {
    let source = match binary {
        Some(path) => path,
        None => std::env::current_exe()
            .context("cannot locate the running executable")?
            .parent()
            .map(|dir| dir.join(HELPER_BINARY))
            .ok_or_else(|| anyhow!("cannot locate {HELPER_BINARY}; pass --binary"))?,
    };
    if !source.is_file() {
        bail!("helper binary not found at {}", source.display());
    }

    if !ctx.json_output {
        println!(
            "{}",
            Style::new()
                .dim()
                .apply_to("Administrator authorization is required to install the helper.")
        );
    }

    let authorizer = platform_authorizer();
    let status = match installation.install(&source, authorizer.as_ref()).await {
        Ok(status) => status,
        Err(e) => {
            return Err(match e.recovery_suggestion() {
                Some(hint) => anyhow!("{e}\n  hint: {hint}"),
                None => e.into(),
            });
        }
    };

    if ctx.json_output {
        return ctx.print_json(&status);
    }
    match status {
        InstallStatus::Current { version } => {
            println!("{} helper {version} installed", Style::new().green().apply_to("✓"));
            Ok(())
        }
        other => bail!("helper installation did not take effect: {other:?}"),
    }
}
