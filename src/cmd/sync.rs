//! `edusync sync`: every configured group, one after another

use crate::audit::MissingLog;
use crate::cmd::Context;
use crate::config::Config;
use crate::error::{EduSyncError, Result};
use crate::helpdesk::Inventory;
use crate::reconcile::maintenance::DeviceManagement;
use crate::reconcile::providers::{
    BuildingCohortSource, CompletedAutopilotSource, DesiredSetProvider, LabRoomSource,
    StatusSource,
};
use crate::reconcile::rooms::BuildingMap;
use crate::reconcile::runner::{SyncRunner, TargetOutcome, TargetResult};
use clap::{Args, ValueEnum};
use colored::Colorize;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetKind {
    Labs,
    Unassigned,
    Completed,
    Buildings,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Only sync one kind of target
    #[arg(long, value_enum)]
    pub only: Option<TargetKind>,

    /// Show the changes without making them
    #[arg(long)]
    pub dry_run: bool,
}

/// Sources in run order: labs, unassigned, completed, buildings.
/// Helpdesk-backed targets are left out when no inventory is given.
pub fn build_sources<'a>(
    config: &'a Config,
    only: Option<TargetKind>,
    buildings: &'a BuildingMap,
    inventory: Option<&'a dyn Inventory>,
    devices: &'a dyn DeviceManagement,
) -> Vec<Box<dyn DesiredSetProvider + 'a>> {
    let wanted = |kind: TargetKind| only.is_none_or(|k| k == kind);
    let mut sources: Vec<Box<dyn DesiredSetProvider + 'a>> = Vec::new();

    if let Some(inventory) = inventory {
        if wanted(TargetKind::Labs) {
            for target in &config.sync.labs {
                sources.push(Box::new(LabRoomSource {
                    target,
                    buildings,
                    inventory,
                }));
            }
        }
        if wanted(TargetKind::Unassigned) {
            if let Some(target) = &config.sync.unassigned {
                sources.push(Box::new(StatusSource { target, inventory }));
            }
        }
    }

    if wanted(TargetKind::Completed) {
        if let Some(target) = &config.sync.completed {
            sources.push(Box::new(CompletedAutopilotSource { target, devices }));
        }
    }

    if let Some(inventory) = inventory {
        if wanted(TargetKind::Buildings) {
            for target in &config.sync.buildings {
                sources.push(Box::new(BuildingCohortSource {
                    target,
                    buildings,
                    inventory,
                }));
            }
        }
    }

    sources
}

pub async fn run(ctx: &Context, args: SyncArgs) -> Result<()> {
    let config = &ctx.config;
    let graph = ctx.graph().await?;
    let helpdesk = match args.only {
        Some(TargetKind::Completed) => None,
        _ => Some(ctx.helpdesk()?),
    };
    let buildings = BuildingMap::new(&config.buildings);
    let audit = ctx.audit();
    let missing = MissingLog::new(&config.sync.missing_log);

    let sources = build_sources(
        config,
        args.only,
        &buildings,
        helpdesk.as_ref().map(|h| h as &dyn Inventory),
        &graph,
    );
    if sources.is_empty() {
        println!("{} No sync targets configured", "ℹ".yellow());
        return Ok(());
    }

    println!(
        "{} {} target(s){}",
        "Syncing".cyan().bold(),
        sources.len(),
        if args.dry_run { " (dry run)" } else { "" }
    );

    let runner = SyncRunner {
        directory: &graph,
        audit: &audit,
        missing: Some(&missing),
        dry_run: args.dry_run,
    };
    let results = runner.sync_all(&sources).await?;

    for result in &results {
        print_result(result);
    }

    let failures: usize = results.iter().map(TargetResult::failures).sum();
    let unresolved: usize = results
        .iter()
        .map(|r| match &r.outcome {
            TargetOutcome::Reconciled(report) => report.unresolved.len(),
            _ => 0,
        })
        .sum();
    if unresolved > 0 {
        println!(
            "\n{} {} unresolved device name(s) appended to {}",
            "!".yellow(),
            unresolved,
            missing.path().display()
        );
    }

    if failures > 0 {
        return Err(EduSyncError::RunIncomplete(failures));
    }
    Ok(())
}

fn print_result(result: &TargetResult) {
    println!("\n{} {} ({})", "→".cyan(), result.group.bold(), result.description);

    match &result.outcome {
        TargetOutcome::Skipped(reason) => {
            println!("  {} skipped: {}", "!".yellow(), reason);
        }
        TargetOutcome::Planned(plan) => {
            if plan.is_empty() {
                println!("  {} already in sync", "✓".green());
            }
            for name in &plan.to_add {
                println!("  {} would add {}", "+".green(), name);
            }
            for name in &plan.to_remove {
                println!("  {} would remove {}", "-".red(), name);
            }
        }
        TargetOutcome::Reconciled(report) => {
            println!(
                "  {} {} added, {} removed, {} unresolved, {} failed",
                if report.is_clean() {
                    "✓".green()
                } else {
                    "✗".red()
                },
                report.added(),
                report.removed(),
                report.unresolved.len(),
                report.failures.len()
            );
            for failure in &report.failures {
                let hint = if failure.transient {
                    " (will retry next run)"
                } else {
                    ""
                };
                println!(
                    "    {} {} {}: {}{}",
                    "✗".red(),
                    failure.op,
                    failure.name,
                    failure.error,
                    hint.dimmed()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CompletedTarget, LabTarget, StatusTarget};
    use crate::reconcile::testing::{FakeDevices, FakeInventory};

    fn config() -> Config {
        let mut config = Config::starter();
        config.sync.labs.push(LabTarget {
            group: "Lab-RE-12".into(),
            building: "RE".into(),
            room: "12".into(),
        });
        config.sync.unassigned = Some(StatusTarget {
            group: "Unassigned Devices".into(),
            statuses: vec!["In Storage".into()],
            types: vec![],
        });
        config.sync.completed = Some(CompletedTarget {
            group: "Autopilot Completed".into(),
        });
        config
    }

    #[test]
    fn test_sources_run_in_fixed_order() {
        let config = config();
        let buildings = BuildingMap::new(&config.buildings);
        let inventory = FakeInventory::default();
        let devices = FakeDevices::default();

        let sources = build_sources(
            &config,
            None,
            &buildings,
            Some(&inventory as &dyn Inventory),
            &devices,
        );
        let groups: Vec<&str> = sources.iter().map(|s| s.group()).collect();

        assert_eq!(
            groups,
            vec![
                "Lab-CHS-101",
                "Lab-RE-12",
                "Unassigned Devices",
                "Autopilot Completed"
            ]
        );
    }

    #[test]
    fn test_only_filter_and_missing_inventory() {
        let config = config();
        let buildings = BuildingMap::new(&config.buildings);
        let inventory = FakeInventory::default();
        let devices = FakeDevices::default();

        let labs = build_sources(
            &config,
            Some(TargetKind::Labs),
            &buildings,
            Some(&inventory as &dyn Inventory),
            &devices,
        );
        assert_eq!(labs.len(), 2);

        let completed_only = build_sources(&config, None, &buildings, None, &devices);
        assert_eq!(completed_only.len(), 1);
        assert_eq!(completed_only[0].group(), "Autopilot Completed");
    }
}
