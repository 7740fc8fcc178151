//! Audit command - inspect, verify and export the run log.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use caretaker_audit::{AuditExport, RunRecord};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Subcommand};
use console::{Style, style};

use super::{Context, truncate};
use crate::services::open_audit;

/// Arguments for the audit command.
#[derive(Args, Debug)]
pub struct AuditArgs {
    #[command(subcommand)]
    pub command: AuditCommand,
}

#[derive(Subcommand, Debug)]
pub enum AuditCommand {
    /// List records, newest first
    List {
        /// Only records for this capability
        #[arg(short, long)]
        capability: Option<String>,

        /// Maximum records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Records to skip
        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Records from the last N hours
    Recent {
        #[arg(long, default_value = "24")]
        hours: u32,
    },

    /// The most recent failed or timed-out run
    LastError,

    /// Verify the hash chain, or an exported file
    Verify {
        /// Exported JSON file to verify instead of the live log
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Export records in a time range as JSON
    Export {
        /// Start of the range (RFC 3339 or YYYY-MM-DD); default: the beginning
        #[arg(long, value_parser = parse_time)]
        from: Option<DateTime<Utc>>,

        /// End of the range (RFC 3339 or YYYY-MM-DD); default: now
        #[arg(long, value_parser = parse_time)]
        to: Option<DateTime<Utc>>,

        /// Output file or directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
}

/// Run the audit command.
pub async fn run(args: AuditArgs, ctx: &Context) -> Result<()> {
    if let AuditCommand::Verify { file: Some(file) } = &args.command {
        return cmd_verify_file(file, ctx);
    }

    let config = ctx.load_config()?.config;
    let store = open_audit(&config)?;

    match args.command {
        AuditCommand::List {
            capability,
            limit,
            offset,
        } => {
            let records = store.fetch(capability.as_deref(), limit, offset)?;
            print_records(&records, ctx)
        }
        AuditCommand::Recent { hours } => {
            let records = store.fetch_recent(hours)?;
            print_records(&records, ctx)
        }
        AuditCommand::LastError => {
            let record = store.last_error()?;
            if ctx.json_output {
                return ctx.print_json(&record);
            }
            match record {
                Some(record) => print_record_detail(&record),
                None => println!("{}", Style::new().dim().apply_to("No failed runs recorded")),
            }
            Ok(())
        }
        AuditCommand::Verify { .. } => {
            let report = store.verify_chain()?;
            if ctx.json_output {
                ctx.print_json(&report)?;
            } else if report.is_valid() {
                println!(
                    "{} {} records, chain intact",
                    Style::new().green().apply_to("✓"),
                    report.total_records
                );
                println!("  {}", Style::new().dim().apply_to(format!("head {}", report.head_hash)));
            } else {
                println!(
                    "{} chain broken at record {}",
                    Style::new().red().apply_to("✗"),
                    report
                        .first_bad_record
                        .map_or_else(|| "?".to_string(), |id| id.to_string())
                );
            }
            if let Some(violation) = report.violation {
                bail!("audit log failed verification: {violation}");
            }
            Ok(())
        }
        AuditCommand::Export { from, to, output } => {
            let from = from.unwrap_or(DateTime::UNIX_EPOCH);
            let to = to.unwrap_or_else(Utc::now);
            if from > to {
                bail!("--from must not be after --to");
            }
            let path = store
                .export_logs(from, to, &output)
                .with_context(|| format!("failed to export audit log to {}", output.display()))?;
            if ctx.json_output {
                ctx.print_json(&serde_json::json!({ "path": path }))
            } else {
                println!("{} {}", Style::new().green().apply_to("Exported to"), path.display());
                Ok(())
            }
        }
    }
}

fn cmd_verify_file(file: &Path, ctx: &Context) -> Result<()> {
    let export = AuditExport::read(file)
        .with_context(|| format!("failed to read export {}", file.display()))?;
    let verdict = export.verify();
    if ctx.json_output {
        ctx.print_json(&serde_json::json!({
            "records": export.records.len(),
            "valid": verdict.is_ok(),
            "violation": verdict.as_ref().err().map(ToString::to_string),
        }))?;
    } else if verdict.is_ok() {
        println!(
            "{} {} records verified",
            Style::new().green().apply_to("✓"),
            export.records.len()
        );
    }
    verdict.with_context(|| format!("{} failed verification", file.display()))
}

/// RFC 3339, or a bare date meaning midnight UTC.
fn parse_time(s: &str) -> std::result::Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("expected RFC 3339 or YYYY-MM-DD, got '{s}'"))
}

fn print_records(records: &[RunRecord], ctx: &Context) -> Result<()> {
    if ctx.json_output {
        return ctx.print_json(&records);
    }

    let dim = Style::new().dim();
    if records.is_empty() {
        println!("{}", dim.apply_to("No records"));
        return Ok(());
    }

    println!("{}", style("Audit Log").bold());
    println!("{}", dim.apply_to("─".repeat(70)));
    for record in records {
        let status = if record.status.is_success() {
            Style::new().green().apply_to(record.status.as_str())
        } else {
            Style::new().red().apply_to(record.status.as_str())
        };
        println!(
            "{:>5}  {}  {:<24} {:<10} {}",
            dim.apply_to(record.id),
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.capability_id,
            status,
            dim.apply_to(truncate(record.summary.as_deref().unwrap_or_default(), 40))
        );
    }
    Ok(())
}

fn print_record_detail(record: &RunRecord) {
    let dim = Style::new().dim();
    println!();
    println!(
        "{} {}",
        style(&record.capability_title).bold(),
        dim.apply_to(format!("#{}", record.id))
    );
    println!("{}", dim.apply_to("─".repeat(40)));
    println!("  {} {}", dim.apply_to("Capability:"), record.capability_id);
    println!("  {} {}", dim.apply_to("When:      "), record.timestamp.to_rfc3339());
    println!("  {} {}", dim.apply_to("Status:    "), record.status);
    if let Some(code) = record.exit_code {
        println!("  {} {}", dim.apply_to("Exit code: "), code);
    }
    println!("  {} {} ms", dim.apply_to("Duration:  "), record.duration_ms);
    for (name, value) in &record.arguments {
        println!("  {} {name}={value}", dim.apply_to("Argument:  "));
    }
    if let Some(summary) = &record.summary {
        println!("  {} {}", dim.apply_to("Summary:   "), summary);
    }
    if let Some(path) = &record.output_path {
        println!("  {} {}", dim.apply_to("Output:    "), path);
    }
    println!();
}
