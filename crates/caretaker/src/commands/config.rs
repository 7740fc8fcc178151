//! Config command - configuration management.

use anyhow::Result;
use clap::{Args, Subcommand};
use console::{Style, style};
use serde::Serialize;

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the resolved configuration and where it came from
    Show,

    /// Show config file and data paths
    Path,
}

#[derive(Debug, Serialize)]
struct PathsOutput {
    user_config: Option<String>,
    project_config: String,
    data_dir: String,
    audit_db: String,
    audit_output_dir: String,
    log_dir: Option<String>,
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Path => cmd_path(ctx),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let loaded = ctx.load_config()?;
    let config = &loaded.config;

    if ctx.json_output {
        return ctx.print_json(&serde_json::json!({
            "layers": loaded.layers,
            "warnings": loaded.warnings,
            "executor": config.executor(),
            "helper": config.helper(),
            "workflow": config.workflow(),
            "permissions": config.permissions(),
            "audit_db": config.audit_db_path(),
            "audit_output_dir": config.audit_output_dir(),
        }));
    }

    let dim = Style::new().dim();
    println!("{}", style("# Caretaker Configuration").bold());
    println!();

    let sources = loaded.loaded_from();
    if sources.is_empty() {
        println!("{}", dim.apply_to("# No config files loaded (using defaults)"));
    } else {
        for source in &sources {
            println!("{}", dim.apply_to(format!("# from {}", source.display())));
        }
    }
    for warning in &loaded.warnings {
        println!("{}", Style::new().yellow().apply_to(format!("# warning: {warning}")));
    }
    println!();

    // Fill in defaults so the effective values are visible.
    let mut effective = config.clone();
    effective.executor = Some(config.executor());
    effective.helper = Some(config.helper());
    effective.workflow = Some(config.workflow());
    effective.permissions = Some(config.permissions());
    println!("{}", effective.to_toml()?);
    Ok(())
}

fn cmd_path(ctx: &Context) -> Result<()> {
    let loaded = ctx.load_config()?;
    let config = &loaded.config;
    let user_config = ctx
        .config_dir
        .as_ref()
        .map(|d| d.join("config.toml"))
        .or_else(caretaker_config::xdg_config_path);
    let log_dir = ctx
        .config_dir
        .clone()
        .or_else(caretaker_config::xdg_config_dir)
        .map(|d| d.join("logs"));

    let output = PathsOutput {
        user_config: user_config.map(|p| p.display().to_string()),
        project_config: "./caretaker.toml".to_string(),
        data_dir: config.paths().effective_data_dir().display().to_string(),
        audit_db: config.audit_db_path().display().to_string(),
        audit_output_dir: config.audit_output_dir().display().to_string(),
        log_dir: log_dir.map(|p| p.display().to_string()),
    };

    if ctx.json_output {
        return ctx.print_json(&output);
    }

    let dim = Style::new().dim();
    let row = |label: &str, value: &str| println!("  {} {}", dim.apply_to(format!("{label:<14}")), value);
    row("User config:", output.user_config.as_deref().unwrap_or("(none)"));
    row("Project:", &output.project_config);
    row("Data dir:", &output.data_dir);
    row("Audit db:", &output.audit_db);
    row("Output dir:", &output.audit_output_dir);
    row("Logs:", output.log_dir.as_deref().unwrap_or("(none)"));
    Ok(())
}
