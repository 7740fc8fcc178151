//! Workflow command - run a multi-step plan.

use std::path::PathBuf;

use anyhow::{Context as _, Result, bail};
use caretaker_workflow::{StepStatus, WorkflowOutcome, WorkflowPlan, WorkflowProgress, WorkflowResult};
use clap::{Args, Subcommand};
use console::{Style, style};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::Context;
use super::capabilities::risk_style;
use crate::services::Services;

/// Arguments for the workflow command.
#[derive(Args, Debug)]
pub struct WorkflowArgs {
    #[command(subcommand)]
    pub command: WorkflowCommand,
}

#[derive(Subcommand, Debug)]
pub enum WorkflowCommand {
    /// Run a plan file
    Run {
        /// Plan JSON: { summary, risk, steps: [{ capability_id, arguments, rationale, critical }] }
        plan: PathBuf,

        /// Validate and preflight every step without running anything
        #[arg(long)]
        dry_run: bool,

        /// Confirm plans that contain destructive steps
        #[arg(short, long)]
        yes: bool,
    },
}

/// Dry-run report for JSON output.
#[derive(Debug, Serialize)]
struct DryRunStep {
    index: usize,
    capability_id: String,
    can_execute: bool,
    blocked_by: Option<String>,
}

/// Run the workflow command.
pub async fn run(args: WorkflowArgs, ctx: &Context) -> Result<()> {
    match args.command {
        WorkflowCommand::Run { plan, dry_run, yes } => cmd_run(plan, dry_run, yes, ctx).await,
    }
}

async fn cmd_run(path: PathBuf, dry_run: bool, yes: bool, ctx: &Context) -> Result<()> {
    let plan = WorkflowPlan::from_file(&path)
        .with_context(|| format!("failed to read plan {}", path.display()))?;
    let services = Services::build(ctx)?;
    let executor = services.workflow_executor();
    executor.validate(&plan)?;

    if !ctx.json_output {
        print_plan(&plan);
    }

    services.permissions.refresh_all().await;
    if dry_run {
        return dry_run_report(&services, &plan, ctx).await;
    }

    let destructive: Vec<&str> = plan
        .steps
        .iter()
        .filter(|s| {
            services
                .catalog
                .capability(&s.capability_id)
                .is_some_and(|c| c.is_destructive())
        })
        .map(|s| s.capability_id.as_str())
        .collect();
    if !destructive.is_empty() && !yes {
        bail!(
            "plan contains destructive steps ({}); pass --yes to run it",
            destructive.join(", ")
        );
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let json = ctx.json_output;
    let result = executor
        .run(&plan, &cancel, |progress| {
            if !json {
                print_progress(progress);
            }
        })
        .await?;

    if ctx.json_output {
        ctx.print_json(&result)?;
    } else {
        print_summary(&result);
    }

    if !result.success {
        bail!("workflow did not complete successfully");
    }
    Ok(())
}

async fn dry_run_report(services: &Services, plan: &WorkflowPlan, ctx: &Context) -> Result<()> {
    let mut steps = Vec::with_capacity(plan.steps.len());
    for (index, step) in plan.steps.iter().enumerate() {
        let preflight = services.router.preflight(&step.capability_id).await?;
        steps.push(DryRunStep {
            index,
            capability_id: step.capability_id.clone(),
            can_execute: preflight.can_execute,
            blocked_by: (!preflight.can_execute).then(|| preflight.describe()),
        });
    }

    if ctx.json_output {
        return ctx.print_json(&steps);
    }

    let green = Style::new().green();
    let red = Style::new().red();
    let dim = Style::new().dim();
    for step in &steps {
        match &step.blocked_by {
            None => println!(
                "  {} {}. {}",
                green.apply_to("✓"),
                step.index + 1,
                step.capability_id
            ),
            Some(reason) => println!(
                "  {} {}. {} {}",
                red.apply_to("✗"),
                step.index + 1,
                step.capability_id,
                dim.apply_to(format!("({reason})"))
            ),
        }
    }
    println!();
    println!("{}", dim.apply_to("Dry run: nothing was executed"));
    Ok(())
}

fn print_plan(plan: &WorkflowPlan) {
    let dim = Style::new().dim();
    println!();
    println!(
        "{} {}",
        style(&plan.summary).bold(),
        risk_style(plan.risk).apply_to(format!("[{}]", plan.risk))
    );
    println!("{}", dim.apply_to("─".repeat(60)));
    for (i, step) in plan.steps.iter().enumerate() {
        let critical = if step.critical { " (critical)" } else { "" };
        println!("  {}. {}{}", i + 1, step.capability_id, critical);
        if !step.rationale.is_empty() {
            println!("     {}", dim.apply_to(&step.rationale));
        }
    }
    println!();
}

fn print_progress(progress: &WorkflowProgress) {
    let step = &progress.step_result;
    let marker = match step.status {
        StepStatus::Success => Style::new().green().apply_to("✓"),
        StepStatus::Failed => Style::new().red().apply_to("✗"),
        StepStatus::TimedOut => Style::new().yellow().apply_to("⏱"),
        StepStatus::Error => Style::new().red().apply_to("!"),
    };
    let detail = match (&step.execution, &step.error) {
        (Some(execution), _) => execution.summary(),
        (None, Some(error)) => error.clone(),
        (None, None) => String::new(),
    };
    println!(
        "  [{}/{}] {} {} {}",
        progress.index + 1,
        progress.total,
        marker,
        step.capability_id,
        Style::new().dim().apply_to(detail)
    );
}

fn print_summary(result: &WorkflowResult) {
    let dim = Style::new().dim();
    println!();
    let headline = match result.outcome {
        WorkflowOutcome::Completed if result.success => {
            Style::new().green().apply_to("Workflow completed".to_string())
        }
        WorkflowOutcome::Completed => Style::new()
            .yellow()
            .apply_to("Workflow completed with failures".to_string()),
        WorkflowOutcome::Cancelled => Style::new().yellow().apply_to("Workflow cancelled".to_string()),
        WorkflowOutcome::Aborted { step } => Style::new()
            .red()
            .apply_to(format!("Workflow aborted at step {}", step + 1)),
    };
    println!("{headline}");
    println!(
        "  {} {:.0}%  {} {} ms",
        dim.apply_to("success rate:"),
        result.success_rate * 100.0,
        dim.apply_to("duration:"),
        result.total_duration.as_millis()
    );
    println!();
}
