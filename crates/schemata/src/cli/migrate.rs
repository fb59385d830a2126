use anyhow::Result;
use clap::Parser;
use console::style;

use schemata_core::MigrationState;
use schemata_runtime::{
    status_summary, ApplyOutcome, BatchReport, MigrationPlan, RollbackOutcome,
};

use super::{confirm, Context};

/// Apply a single migration.
#[derive(Parser)]
pub struct ApplyCommand {
    /// Version (or `<version>_<name>`) to apply.
    pub version: String,

    /// Show the statements without executing them.
    #[arg(long)]
    pub dry_run: bool,
}

/// Apply all pending migrations.
#[derive(Parser)]
pub struct UpCommand {
    /// Show the statements without executing them.
    #[arg(long)]
    pub dry_run: bool,
}

/// Roll back an applied migration.
#[derive(Parser)]
pub struct RollbackCommand {
    /// Version (or `<version>_<name>`) to roll back.
    pub version: String,

    /// Show the statements without executing them.
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the confirmation prompt.
    #[arg(short, long)]
    pub yes: bool,
}

/// Roll back the migration with the greatest applied version.
#[derive(Parser)]
pub struct RollbackLastCommand {
    /// Show the statements without executing them.
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the confirmation prompt.
    #[arg(short, long)]
    pub yes: bool,
}

pub async fn status(ctx: &Context) -> Result<()> {
    let statuses = ctx.engine.status().await?;
    if ctx.json {
        return ctx.print_json(&statuses);
    }

    println!();
    print!(
        "{}",
        status_summary(ctx.engine.backend().db_type(), &statuses)
    );
    println!();

    for status in &statuses {
        let marker = match status.state {
            MigrationState::Pending => style("○").dim(),
            MigrationState::Applied => style("✓").green(),
            MigrationState::AppliedWithDrift => style("!").yellow(),
            MigrationState::MissingFile => style("✗").red(),
        };
        let applied_at = status
            .applied_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        println!(
            "  {} {:<40} {:<20} {}",
            marker,
            status.full_name(),
            status.state.to_string(),
            style(applied_at).dim()
        );
    }
    println!();
    Ok(())
}

pub async fn pending(ctx: &Context) -> Result<()> {
    let pending = ctx.engine.pending().await?;
    if ctx.json {
        return ctx.print_json(&pending);
    }

    println!();
    if pending.is_empty() {
        println!("  {} No pending migrations", style("✓").green());
    }
    for migration in &pending {
        let down_marker = if migration.has_down() {
            style("↓").green().to_string()
        } else {
            style("-").dim().to_string()
        };
        println!("  {} {} {}", style("○").dim(), migration.full_name(), down_marker);
    }
    println!();
    Ok(())
}

pub async fn drift(ctx: &Context) -> Result<()> {
    let reports = ctx.engine.check_drift().await?;
    let drifted = reports.iter().filter(|r| r.drifted()).count();

    if ctx.json {
        ctx.print_json(&reports)?;
    } else {
        println!();
        if reports.is_empty() {
            println!("  {} No migrations applied", style("ℹ").blue());
        }
        for report in &reports {
            let marker = if report.drifted() {
                style("!").yellow()
            } else {
                style("✓").green()
            };
            println!(
                "  {} {}_{} {}",
                marker,
                report.version,
                report.name,
                style(report.kind.as_str()).dim()
            );
        }
        println!();
    }

    if drifted > 0 {
        anyhow::bail!("{} applied migration(s) have drifted", drifted);
    }
    Ok(())
}

impl ApplyCommand {
    pub async fn execute(self, ctx: &Context) -> Result<()> {
        let outcome = ctx.engine.apply(&self.version, self.dry_run).await?;
        if ctx.json {
            return ctx.print_json(&outcome);
        }

        println!();
        print_apply_outcome(&outcome);
        println!();
        Ok(())
    }
}

impl UpCommand {
    pub async fn execute(self, ctx: &Context) -> Result<()> {
        let report = ctx.engine.apply_all_pending(self.dry_run).await?;
        if ctx.json {
            ctx.print_json(&report)?;
        } else {
            print_batch_report(&report);
        }

        if let Some(failed) = &report.failed {
            anyhow::bail!("migration {} failed: {}", failed.version, failed.error);
        }
        Ok(())
    }
}

impl RollbackCommand {
    pub async fn execute(self, ctx: &Context) -> Result<()> {
        if !self.dry_run && !self.yes {
            require_yes_for_json(ctx)?;
            if !confirm(&format!("Roll back migration {}?", self.version))? {
                println!("  {} Cancelled", style("ℹ").blue());
                return Ok(());
            }
        }

        let outcome = ctx.engine.rollback(&self.version, self.dry_run).await?;
        print_rollback_outcome(ctx, &outcome)
    }
}

impl RollbackLastCommand {
    pub async fn execute(self, ctx: &Context) -> Result<()> {
        if !self.dry_run && !self.yes {
            require_yes_for_json(ctx)?;
            let Some(current) = ctx.engine.current_version().await? else {
                println!("  {} No migrations applied", style("ℹ").blue());
                return Ok(());
            };
            if !confirm(&format!("Roll back migration {}?", current))? {
                println!("  {} Cancelled", style("ℹ").blue());
                return Ok(());
            }
        }

        let outcome = ctx.engine.rollback_last(self.dry_run).await?;
        print_rollback_outcome(ctx, &outcome)
    }
}

/// JSON mode never prompts, so destructive commands need `--yes`.
fn require_yes_for_json(ctx: &Context) -> Result<()> {
    if ctx.json {
        anyhow::bail!("--yes is required to roll back with --json");
    }
    Ok(())
}

fn print_apply_outcome(outcome: &ApplyOutcome) {
    match outcome {
        ApplyOutcome::Planned(plan) => print_plan(plan),
        ApplyOutcome::Applied(entry) => println!(
            "  {} Applied {}_{} {}",
            style("✓").green(),
            entry.version,
            entry.name,
            style(format!("({} ms)", entry.execution_time_ms)).dim()
        ),
    }
}

fn print_rollback_outcome(ctx: &Context, outcome: &RollbackOutcome) -> Result<()> {
    if ctx.json {
        return ctx.print_json(outcome);
    }

    println!();
    match outcome {
        RollbackOutcome::Planned(plan) => print_plan(plan),
        RollbackOutcome::RolledBack {
            version,
            name,
            execution_time_ms,
        } => println!(
            "  {} Rolled back {}_{} {}",
            style("✓").green(),
            version,
            name,
            style(format!("({} ms)", execution_time_ms)).dim()
        ),
    }
    println!();
    Ok(())
}

fn print_plan(plan: &MigrationPlan) {
    println!(
        "  {} Would run {}_{} ({}, {} statement(s)):",
        style("→").dim(),
        plan.version,
        plan.name,
        plan.direction,
        plan.statements.len()
    );
    for statement in &plan.statements {
        for line in statement.lines() {
            println!("      {}", style(line).dim());
        }
        println!();
    }
}

fn print_batch_report(report: &BatchReport) {
    println!();
    if report.total == 0 {
        println!("  {} No pending migrations", style("✓").green());
        println!();
        return;
    }

    for outcome in &report.succeeded {
        print_apply_outcome(outcome);
    }
    if let Some(failed) = &report.failed {
        println!(
            "  {} Failed {}_{}: {}",
            style("✗").red(),
            failed.version,
            failed.name,
            failed.error
        );
    }
    for version in &report.unattempted {
        println!("  {} Skipped {}", style("○").dim(), version);
    }

    println!();
    let verb = if report.dry_run { "Planned" } else { "Applied" };
    println!(
        "  {} {} {} of {} migration(s)",
        if report.failed.is_some() {
            style("!").yellow()
        } else {
            style("✓").green()
        },
        verb,
        report.succeeded.len(),
        report.total
    );
    println!();
}
