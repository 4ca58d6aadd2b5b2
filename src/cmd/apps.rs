use crate::cmd::Context;
use crate::error::{EduSyncError, Result};
use crate::graph::intune::list_app_assignments_for_group;
use crate::reconcile::Directory;
use clap::{Args, Subcommand};
use colored::Colorize;

#[derive(Subcommand, Debug)]
pub enum AppsCommands {
    /// List the Intune apps assigned to a group
    Assignments(AssignmentsArgs),
}

#[derive(Args, Debug)]
pub struct AssignmentsArgs {
    /// Group display name
    #[arg(short, long)]
    pub group: String,
}

pub async fn assignments(ctx: &Context, args: AssignmentsArgs) -> Result<()> {
    println!(
        "{} app assignments for {}...",
        "Listing".cyan().bold(),
        args.group.bold()
    );

    let graph = ctx.graph().await?;
    let group_id = graph
        .lookup_group_id(&args.group)
        .await?
        .ok_or_else(|| EduSyncError::not_found("Group", &args.group))?;

    let found = list_app_assignments_for_group(&graph, &group_id).await?;
    if found.is_empty() {
        println!("{} No apps are assigned to {}", "ℹ".yellow(), args.group);
        return Ok(());
    }

    println!("\n{} {} assignment(s)", "→".cyan(), found.len());
    println!("\n{:<50} {:<22} {:<12} {:<8}", "Name", "Type", "Intent", "Mode");
    println!("{}", "─".repeat(94));

    for assignment in &found {
        let mode = if assignment.excluded {
            "exclude".red()
        } else {
            "include".green()
        };
        println!(
            "{:<50} {:<22} {:<12} {:<8}",
            assignment.app_name, assignment.app_type, assignment.intent, mode
        );
    }

    Ok(())
}
