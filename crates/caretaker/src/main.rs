//! Caretaker - capability-based system maintenance
//!
//! Main entry point for the Caretaker CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod services;

use commands::{audit, capabilities, config, helper, permissions, preflight, run, workflow};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Caretaker - capability-based system maintenance
#[derive(Parser)]
#[command(name = "caretaker")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Capability catalog file (overrides config and the embedded catalog)
    #[arg(long, global = true, env = "CARETAKER_CATALOG")]
    pub catalog: Option<PathBuf>,

    /// User config directory
    #[arg(long, global = true, env = "CARETAKER_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Browse the capability catalog
    Capabilities(capabilities::CapabilitiesArgs),

    /// Check whether a capability can run, without running it
    Preflight(preflight::PreflightArgs),

    /// Run a single capability
    Run(run::RunArgs),

    /// Run a multi-step plan
    Workflow(workflow::WorkflowArgs),

    /// Inspect and export the audit log
    Audit(audit::AuditArgs),

    /// Inspect and request system permissions
    Permissions(permissions::PermissionsArgs),

    /// Privileged helper status and installation
    Helper(helper::HelperArgs),

    /// Configuration management
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Console (human-readable, stderr) + rotating JSON file
    let filter = if cli.verbose {
        "caretaker=debug,caretaker_exec=debug,caretaker_workflow=debug,caretaker_helper=debug,caretaker_permissions=debug,caretaker_audit=debug,caretaker_catalog=debug,caretaker_config=debug,info"
    } else {
        "caretaker=warn,caretaker_exec=warn,caretaker_workflow=warn,warn"
    };

    let log_dir = cli
        .config_dir
        .clone()
        .or_else(caretaker_config::xdg_config_dir)
        .map(|d| d.join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "caretaker.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "caretaker=trace,caretaker_exec=trace,caretaker_workflow=trace,caretaker_helper=debug,caretaker_permissions=debug,caretaker_audit=debug,caretaker_catalog=debug,caretaker_config=debug,info",
                )),
        )
        .init();

    let ctx = commands::Context {
        json_output: cli.json,
        verbose: cli.verbose,
        catalog: cli.catalog,
        config_dir: cli.config_dir,
    };

    match cli.command {
        Commands::Capabilities(args) => capabilities::run(args, &ctx).await,
        Commands::Preflight(args) => preflight::run(args, &ctx).await,
        Commands::Run(args) => run::run(args, &ctx).await,
        Commands::Workflow(args) => workflow::run(args, &ctx).await,
        Commands::Audit(args) => audit::run(args, &ctx).await,
        Commands::Permissions(args) => permissions::run(args, &ctx).await,
        Commands::Helper(args) => helper::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}
