//! Intune device clean-up commands

use crate::cmd::{Context, confirm, finish_batch};
use crate::error::Result;
use crate::reconcile::maintenance::{remove_duplicates, remove_primary_users, remove_retired};
use clap::{Args, Subcommand};
use colored::Colorize;

#[derive(Subcommand, Debug)]
pub enum DevicesCommands {
    /// Remove the primary user from shared Windows devices
    PrimaryUsers(PrimaryUsersArgs),

    /// Delete older managed-device records that share a serial number
    Dedupe(CleanupArgs),

    /// Delete Autopilot registrations of devices the helpdesk lists as retired
    Retire(CleanupArgs),
}

#[derive(Args, Debug)]
pub struct PrimaryUsersArgs {
    /// OS version prefix; defaults to [sync] primary_user_os_prefix
    #[arg(long)]
    pub os_prefix: Option<String>,

    /// Show what would change without changing it
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct CleanupArgs {
    /// Show what would be deleted without deleting
    #[arg(long)]
    pub dry_run: bool,

    /// Skip confirmation prompt
    #[arg(short = 'y', long)]
    pub yes: bool,
}

pub async fn primary_users(ctx: &Context, args: PrimaryUsersArgs) -> Result<()> {
    let prefix = args
        .os_prefix
        .as_deref()
        .unwrap_or(&ctx.config.sync.primary_user_os_prefix);
    println!(
        "{} primary users from Windows {} devices...",
        "Removing".cyan().bold(),
        prefix
    );

    let graph = ctx.graph().await?;
    let report = remove_primary_users(&graph, prefix, &ctx.audit(), args.dry_run).await?;
    finish_batch(&report, "Primary users")
}

pub async fn dedupe(ctx: &Context, args: CleanupArgs) -> Result<()> {
    println!("{} duplicate managed devices...", "Finding".cyan().bold());

    let graph = ctx.graph().await?;
    let audit = ctx.audit();
    let preview = remove_duplicates(&graph, &audit, true).await?;

    if args.dry_run || preview.planned.is_empty() {
        return finish_batch(&preview, "Duplicates");
    }
    for item in &preview.planned {
        println!("  {} {}", "•".cyan(), item);
    }
    if !args.yes
        && !confirm(&format!(
            "Delete {} duplicate managed device record(s)?",
            preview.planned.len()
        ))?
    {
        println!("{} Cancelled", "!".yellow());
        return Ok(());
    }

    let report = remove_duplicates(&graph, &audit, false).await?;
    finish_batch(&report, "Duplicates")
}

pub async fn retire(ctx: &Context, args: CleanupArgs) -> Result<()> {
    println!("{} retired Autopilot devices...", "Finding".cyan().bold());

    let graph = ctx.graph().await?;
    let helpdesk = ctx.helpdesk()?;
    let audit = ctx.audit();
    let statuses = &ctx.config.sync.retired_statuses;
    let preview = remove_retired(&graph, &helpdesk, statuses, &audit, true).await?;

    if args.dry_run || preview.planned.is_empty() {
        return finish_batch(&preview, "Retired devices");
    }
    for item in &preview.planned {
        println!("  {} {}", "•".cyan(), item);
    }
    if !args.yes
        && !confirm(&format!(
            "Delete {} Autopilot registration(s)?",
            preview.planned.len()
        ))?
    {
        println!("{} Cancelled", "!".yellow());
        return Ok(());
    }

    let report = remove_retired(&graph, &helpdesk, statuses, &audit, false).await?;
    finish_batch(&report, "Retired devices")
}
