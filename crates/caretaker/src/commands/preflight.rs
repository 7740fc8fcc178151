//! Preflight command - validate a capability without running it.

use anyhow::{Result, bail};
use caretaker_exec::{MissingPermission, PreflightResult};
use clap::Args;
use console::{Style, style};

use super::Context;
use crate::services::Services;

/// Arguments for the preflight command.
#[derive(Args, Debug)]
pub struct PreflightArgs {
    /// Capability id
    pub id: String,
}

/// Run the preflight command.
pub async fn run(args: PreflightArgs, ctx: &Context) -> Result<()> {
    let services = Services::build(ctx)?;
    services.permissions.refresh_all().await;
    let result = services.router.preflight(&args.id).await?;

    if ctx.json_output {
        ctx.print_json(&result)?;
    } else {
        print_result(&result);
    }

    if !result.can_execute {
        bail!("'{}' cannot run right now", args.id);
    }
    Ok(())
}

/// Human-readable preflight report, shared with `run`.
pub(crate) fn print_result(result: &PreflightResult) {
    let green = Style::new().green();
    let red = Style::new().red();
    let dim = Style::new().dim();

    println!();
    println!(
        "{} {}",
        style("Preflight").bold(),
        dim.apply_to(&result.capability_id)
    );
    println!("{}", dim.apply_to("─".repeat(40)));

    if result.can_execute {
        println!("  {}", green.apply_to("● ready to run"));
        println!();
        return;
    }

    println!("  {}", red.apply_to("● blocked"));
    for missing in &result.missing_permissions {
        println!("  {} {}", red.apply_to("✗"), missing.describe());
        if let MissingPermission::Permission { kind, .. } = missing {
            for step in caretaker_permissions::remediation_steps(kind) {
                println!("      {}", dim.apply_to(step));
            }
        }
    }
    for failed in &result.failed_checks {
        println!(
            "  {} {} {}",
            red.apply_to("✗"),
            failed.check.message,
            dim.apply_to(format!("({})", failed.observed))
        );
    }
    println!();
}
