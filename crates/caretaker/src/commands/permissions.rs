//! Permissions command - inspect and request system permissions.

use std::sync::Arc;

use anyhow::{Result, bail};
use caretaker_helper::HelperInstallation;
use caretaker_permissions::{
    PermissionCenter, PermissionKind, PermissionSnapshot, PermissionState, is_valid_bundle_id,
};
use clap::{Args, Subcommand};
use console::{Style, style};
use serde::Serialize;

use super::Context;
use crate::services::{load_catalog, permission_center};

/// Arguments for the permissions command.
#[derive(Args, Debug)]
pub struct PermissionsArgs {
    #[command(subcommand)]
    pub command: PermissionsCommand,
}

#[derive(Subcommand, Debug)]
pub enum PermissionsCommand {
    /// Check every known permission
    Status,

    /// Re-check and list only what is missing
    Refresh,

    /// Ask for Automation access to an app (may show a consent prompt)
    Request {
        /// Bundle id, e.g. com.apple.Safari
        bundle_id: String,
    },

    /// How to grant a permission
    Remediate {
        /// automation:<bundle id>, full_disk_access or helper_installation
        kind: String,
    },
}

#[derive(Debug, Serialize)]
struct Remediation {
    kind: PermissionKind,
    settings_url: &'static str,
    steps: Vec<String>,
}

/// Run the permissions command.
pub async fn run(args: PermissionsArgs, ctx: &Context) -> Result<()> {
    let center = build_center(ctx)?;

    match args.command {
        PermissionsCommand::Status => {
            let snapshot = center.refresh_all().await;
            if ctx.json_output {
                return ctx.print_json(&snapshot);
            }
            print_snapshot(&snapshot, false);
            Ok(())
        }
        PermissionsCommand::Refresh => {
            let snapshot = center.refresh_all().await;
            if ctx.json_output {
                let missing: Vec<_> = snapshot.missing().collect();
                return ctx.print_json(&missing);
            }
            print_snapshot(&snapshot, true);
            Ok(())
        }
        PermissionsCommand::Request { bundle_id } => {
            if !is_valid_bundle_id(&bundle_id) {
                bail!("'{bundle_id}' is not a valid bundle id");
            }
            let status = center.request_automation_permission(&bundle_id).await?;
            if ctx.json_output {
                return ctx.print_json(&status);
            }
            let state = status.state();
            println!(
                "{} {}",
                state_style(state).apply_to(state.as_str()),
                PermissionKind::Automation(bundle_id)
            );
            if let Some(detail) = status.detail() {
                println!("  {}", Style::new().dim().apply_to(detail));
            }
            Ok(())
        }
        PermissionsCommand::Remediate { kind } => {
            let Some(kind) = PermissionKind::from_key(&kind) else {
                bail!(
                    "unknown permission '{kind}' (expected automation:<bundle id>, full_disk_access or helper_installation)"
                );
            };
            let remediation = Remediation {
                settings_url: center.settings_url(&kind),
                steps: center.remediation_steps(&kind),
                kind,
            };
            if ctx.json_output {
                return ctx.print_json(&remediation);
            }
            println!();
            println!("{}", style(&remediation.kind).bold());
            for (i, step) in remediation.steps.iter().enumerate() {
                println!("  {}. {}", i + 1, step);
            }
            println!();
            println!(
                "  {} {}",
                Style::new().dim().apply_to("Open:"),
                remediation.settings_url
            );
            println!();
            Ok(())
        }
    }
}

fn build_center(ctx: &Context) -> Result<PermissionCenter> {
    let config = ctx.load_config()?.config;
    let catalog = load_catalog(ctx, &config);
    let installation = Arc::new(HelperInstallation::from_config(&config.helper()));
    Ok(permission_center(&config, &catalog, installation))
}

fn print_snapshot(snapshot: &PermissionSnapshot, missing_only: bool) {
    let dim = Style::new().dim();
    println!();
    println!("{}", style("Permissions").bold());
    println!("{}", dim.apply_to("─".repeat(50)));

    let mut shown = 0;
    for entry in snapshot.entries.values() {
        if missing_only && entry.state.is_granted() {
            continue;
        }
        shown += 1;
        println!(
            "  {:<16} {}",
            state_style(entry.state).apply_to(entry.state.as_str()),
            entry.kind
        );
        if let Some(detail) = &entry.detail {
            println!("  {:<16} {}", "", dim.apply_to(detail));
        }
    }
    if shown == 0 {
        println!("  {}", Style::new().green().apply_to("Nothing missing"));
    } else if missing_only {
        println!();
        println!(
            "  {}",
            dim.apply_to("Run `caretaker permissions remediate <kind>` for instructions")
        );
    }
    println!();
}

fn state_style(state: PermissionState) -> Style {
    match state {
        PermissionState::Granted => Style::new().green(),
        PermissionState::Denied => Style::new().red(),
        PermissionState::NotDetermined => Style::new().yellow(),
        PermissionState::Unknown => Style::new().dim(),
    }
}
