//! Run command - execute a single capability.

use std::collections::HashMap;

use anyhow::{Result, anyhow, bail};
use caretaker_exec::{ExecError, ExecutionResult, ExecutionStatus};
use clap::Args;
use console::{Style, style};

use super::Context;
use super::preflight::print_result;
use crate::services::Services;

/// Arguments for the run command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Capability id
    pub id: String,

    /// Capability argument as name=value (repeatable)
    #[arg(short, long = "arg", value_parser = parse_key_val)]
    pub args: Vec<(String, String)>,

    /// Confirm a destructive capability
    #[arg(short, long)]
    pub yes: bool,

    /// Show full stdout and stderr
    #[arg(long)]
    pub output: bool,
}

/// Run the run command.
pub async fn run(args: RunArgs, ctx: &Context) -> Result<()> {
    let services = Services::build(ctx)?;
    let capability = services.router.capability(&args.id)?;
    if capability.is_destructive() && !args.yes {
        bail!(
            "'{}' is destructive; pass --yes to run it{}",
            capability.id,
            capability
                .rollback_notes
                .as_deref()
                .map(|n| format!(" (rollback: {n})"))
                .unwrap_or_default()
        );
    }

    let arguments: HashMap<String, String> = args.args.into_iter().collect();
    services.permissions.refresh_all().await;

    let result = match services.router.execute(&args.id, &arguments).await {
        Ok(result) => result,
        Err(ExecError::PreflightFailed(preflight)) => {
            if ctx.json_output {
                ctx.print_json(&preflight)?;
            } else {
                print_result(&preflight);
            }
            bail!("'{}' was not run", args.id);
        }
        Err(e) => {
            let suggestion = e.recovery_suggestion();
            return Err(match suggestion {
                Some(hint) => anyhow!("{e}\n  hint: {hint}"),
                None => e.into(),
            });
        }
    };

    if ctx.json_output {
        ctx.print_json(&result)?;
    } else {
        print_execution(&result, args.output || ctx.verbose);
    }

    if !result.is_success() {
        bail!("'{}' {}", args.id, status_text(result.status));
    }
    Ok(())
}

/// Parse `name=value`.
fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{s}'"))?;
    if key.is_empty() {
        return Err(format!("missing argument name in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn status_text(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Success => "succeeded",
        ExecutionStatus::Failed => "failed",
        ExecutionStatus::TimedOut => "timed out",
    }
}

pub(crate) fn print_execution(result: &ExecutionResult, full_output: bool) {
    let dim = Style::new().dim();
    let marker = match result.status {
        ExecutionStatus::Success => Style::new().green().apply_to("✓"),
        ExecutionStatus::Failed => Style::new().red().apply_to("✗"),
        ExecutionStatus::TimedOut => Style::new().yellow().apply_to("⏱"),
    };

    println!(
        "{} {} {}",
        marker,
        style(&result.capability_id).bold(),
        dim.apply_to(format!(
            "({}, {} ms{})",
            status_text(result.status),
            result.duration_ms,
            result
                .exit_code
                .map(|c| format!(", exit {c}"))
                .unwrap_or_default()
        ))
    );

    let summary = result.summary();
    if !summary.is_empty() {
        println!("  {summary}");
    }
    if let Some(error) = &result.parse_error {
        println!("  {} {}", dim.apply_to("parse error:"), error);
    }
    if result.truncated {
        println!("  {}", dim.apply_to("(output truncated)"));
    }
    if full_output {
        if !result.stdout.is_empty() {
            println!();
            println!("{}", result.stdout.trim_end());
        }
        if !result.stderr.is_empty() {
            println!();
            println!("{}", dim.apply_to("--- stderr ---"));
            println!("{}", result.stderr.trim_end());
        }
    }
    if let Some(id) = result.audit_record_id {
        println!("  {}", dim.apply_to(format!("audit record #{id}")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("pid=42").unwrap(),
            ("pid".to_string(), "42".to_string())
        );
        assert_eq!(
            parse_key_val("domain=a=b").unwrap(),
            ("domain".to_string(), "a=b".to_string())
        );
        assert_eq!(parse_key_val("empty=").unwrap().1, "");
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=x").is_err());
    }
}
