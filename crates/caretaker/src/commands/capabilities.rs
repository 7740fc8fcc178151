//! Capabilities command - browse the catalog.

use anyhow::{Result, bail};
use caretaker_catalog::{Capability, CapabilityCatalog, PrivilegeLevel, RiskLevel};
use clap::{Args, Subcommand};
use console::{Style, style};

use super::{Context, truncate};
use crate::services::load_catalog;

/// Arguments for the capabilities command.
#[derive(Args, Debug)]
pub struct CapabilitiesArgs {
    #[command(subcommand)]
    pub command: CapabilitiesCommand,
}

#[derive(Subcommand, Debug)]
pub enum CapabilitiesCommand {
    /// List capabilities, grouped
    List {
        /// Only this group
        #[arg(short, long)]
        group: Option<String>,

        /// Only this privilege level (user, elevated, automation)
        #[arg(short, long)]
        privilege: Option<PrivilegeLevel>,

        /// Only this risk level (safe, moderate, destructive)
        #[arg(short, long)]
        risk: Option<RiskLevel>,
    },

    /// Show one capability in full
    Show {
        /// Capability id, e.g. diag.mem
        id: String,
    },

    /// Search titles, descriptions and ids
    Search {
        /// Case-insensitive text to look for
        query: String,
    },

    /// Counts per group, privilege and risk
    Stats,
}

/// Run the capabilities command.
pub async fn run(args: CapabilitiesArgs, ctx: &Context) -> Result<()> {
    let config = ctx.load_config()?.config;
    let catalog = load_catalog(ctx, &config);
    if let Some(error) = catalog.load_error() {
        bail!("capability catalog is unavailable: {error}");
    }

    match args.command {
        CapabilitiesCommand::List {
            group,
            privilege,
            risk,
        } => cmd_list(&catalog, group.as_deref(), privilege, risk, ctx),
        CapabilitiesCommand::Show { id } => cmd_show(&catalog, &id, ctx),
        CapabilitiesCommand::Search { query } => cmd_search(&catalog, &query, ctx),
        CapabilitiesCommand::Stats => cmd_stats(&catalog, ctx),
    }
}

fn cmd_list(
    catalog: &CapabilityCatalog,
    group: Option<&str>,
    privilege: Option<PrivilegeLevel>,
    risk: Option<RiskLevel>,
    ctx: &Context,
) -> Result<()> {
    let selected: Vec<&Capability> = catalog
        .all()
        .iter()
        .filter(|c| group.is_none_or(|g| c.group == g))
        .filter(|c| privilege.is_none_or(|p| c.privilege == p))
        .filter(|c| risk.is_none_or(|r| c.risk == r))
        .collect();

    if ctx.json_output {
        return ctx.print_json(&selected);
    }

    let dim = Style::new().dim();
    if selected.is_empty() {
        println!("{}", dim.apply_to("No matching capabilities"));
        return Ok(());
    }

    println!(
        "{} {}",
        style("Capabilities").bold(),
        dim.apply_to(format!("(catalog {})", catalog.version()))
    );
    println!("{}", dim.apply_to("─".repeat(60)));
    for name in catalog.groups() {
        let in_group: Vec<&&Capability> = selected.iter().filter(|c| c.group == name).collect();
        if in_group.is_empty() {
            continue;
        }
        println!();
        println!("{}", style(name).cyan().bold());
        for cap in in_group {
            print_row(cap);
        }
    }
    println!();
    Ok(())
}

fn cmd_show(catalog: &CapabilityCatalog, id: &str, ctx: &Context) -> Result<()> {
    let Some(cap) = catalog.capability(id) else {
        bail!("unknown capability '{id}'");
    };

    if ctx.json_output {
        return ctx.print_json(cap);
    }

    let dim = Style::new().dim();
    println!();
    println!("{} {}", style(&cap.title).bold(), dim.apply_to(&cap.id));
    println!("{}", dim.apply_to("─".repeat(60)));
    println!("  {}", cap.description);
    println!();
    println!("  {} {}", dim.apply_to("Group:     "), cap.group);
    println!("  {} {}", dim.apply_to("Privilege: "), cap.privilege);
    println!("  {} {}", dim.apply_to("Risk:      "), risk_style(cap.risk).apply_to(cap.risk));
    println!("  {} {}", dim.apply_to("Command:   "), cap.command);
    for (i, arg) in cap.arguments.iter().enumerate() {
        let label = if i == 0 { "Arguments: " } else { "           " };
        let pattern = cap.argument_patterns.get(arg).map_or("", String::as_str);
        println!(
            "  {} {arg} {}",
            dim.apply_to(label),
            dim.apply_to(format!("/{pattern}/"))
        );
    }
    println!("  {} {}s", dim.apply_to("Timeout:   "), cap.timeout_secs);
    if let Some(secs) = cap.estimated_duration_secs {
        println!("  {} ~{secs}s", dim.apply_to("Estimate:  "));
    }
    if !cap.required_apps.is_empty() {
        println!("  {} {}", dim.apply_to("Apps:      "), cap.required_apps.join(", "));
    }

    let checks = cap.effective_preflight();
    if !checks.is_empty() {
        println!();
        println!("  {}", style("Preflight").bold());
        for check in checks {
            println!("    {} {}", dim.apply_to("·"), check.message);
        }
    }
    if let Some(notes) = &cap.rollback_notes {
        println!();
        println!("  {} {}", dim.apply_to("Rollback:"), notes);
    }
    println!();
    Ok(())
}

fn cmd_search(catalog: &CapabilityCatalog, query: &str, ctx: &Context) -> Result<()> {
    let results = catalog.search(query);

    if ctx.json_output {
        return ctx.print_json(&results);
    }

    let dim = Style::new().dim();
    if results.is_empty() {
        println!("{}", dim.apply_to(format!("No capabilities match \"{query}\"")));
        return Ok(());
    }
    for cap in results {
        print_row(cap);
    }
    Ok(())
}

fn cmd_stats(catalog: &CapabilityCatalog, ctx: &Context) -> Result<()> {
    let stats = catalog.statistics();

    if ctx.json_output {
        return ctx.print_json(&stats);
    }

    let dim = Style::new().dim();
    println!();
    println!("{}", style("Catalog Statistics").bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    println!("  {} {}", dim.apply_to("Version:"), catalog.version());
    if let Some(updated) = catalog.last_updated() {
        println!("  {} {}", dim.apply_to("Updated:"), updated);
    }
    println!("  {} {}", dim.apply_to("Total:  "), stats.total);
    for (title, counts) in [
        ("By group", &stats.by_group),
        ("By privilege", &stats.by_privilege),
        ("By risk", &stats.by_risk),
    ] {
        println!();
        println!("  {}", style(title).bold());
        for (key, count) in counts {
            println!("    {:<16} {}", key, count);
        }
    }
    println!();
    Ok(())
}

fn print_row(cap: &Capability) {
    let dim = Style::new().dim();
    println!(
        "  {:<28} {:<44} {} {}",
        style(&cap.id).green(),
        truncate(&cap.title, 44),
        dim.apply_to(format!("{:<10}", cap.privilege)),
        risk_style(cap.risk).apply_to(cap.risk)
    );
}

pub(crate) fn risk_style(risk: RiskLevel) -> Style {
    match risk {
        RiskLevel::Safe => Style::new().green(),
        RiskLevel::Moderate => Style::new().yellow(),
        RiskLevel::Destructive => Style::new().red().bold(),
    }
}
