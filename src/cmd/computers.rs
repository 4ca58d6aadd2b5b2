use crate::ad::{PowerShellDirectory, TcpProbe};
use crate::cmd::{Context, finish_batch};
use crate::error::Result;
use crate::reconcile::computers::reconcile_computers;
use clap::{Args, Subcommand};
use colored::Colorize;
use std::time::Duration;

#[derive(Subcommand, Debug)]
pub enum ComputersCommands {
    /// Delete stale computer objects and rename misnamed ones
    Reconcile(ReconcileArgs),
}

#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Show what would change without changing it
    #[arg(long)]
    pub dry_run: bool,

    /// PowerShell executable running the ActiveDirectory module
    #[arg(long, default_value = "pwsh")]
    pub shell: String,
}

pub async fn reconcile(ctx: &Context, args: ReconcileArgs) -> Result<()> {
    let settings = &ctx.config.computers;
    println!(
        "{} computer objects under {}...",
        "Reconciling".cyan().bold(),
        if settings.search_base.is_empty() {
            "the whole domain"
        } else {
            settings.search_base.as_str()
        }
    );

    let directory = PowerShellDirectory::new(&settings.search_base).with_shell(args.shell);
    let probe = TcpProbe::new(
        settings.probe_port,
        Duration::from_secs(settings.probe_timeout_secs),
    );
    let graph = ctx.graph().await?;
    let helpdesk = ctx.helpdesk()?;

    let report = reconcile_computers(
        &directory,
        &graph,
        &helpdesk,
        &probe,
        settings,
        &ctx.audit(),
        args.dry_run,
    )
    .await?;
    finish_batch(&report, "Computers")
}
