pub mod apps;
pub mod computers;
pub mod config;
pub mod devices;
pub mod login;
pub mod progress;
pub mod rooms;
pub mod sync;

use crate::audit::AuditLog;
use crate::config::{Config, ConfigManager};
use crate::error::Result;
use crate::graph::GraphClient;
use crate::helpdesk::HelpdeskClient;
use crate::reconcile::BatchReport;
use colored::Colorize;
use dialoguer::{Confirm, theme::ColorfulTheme};
use std::path::Path;

/// Configuration loaded once at startup and handed to every command
pub struct Context {
    pub manager: ConfigManager,
    pub config: Config,
}

impl Context {
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let manager = ConfigManager::from_flag(config_path)?;
        let config = manager.load_config()?;
        Ok(Self { manager, config })
    }

    pub async fn graph(&self) -> Result<GraphClient> {
        let spinner = progress::create_spinner("Connecting to Microsoft Graph...");
        match GraphClient::from_config(&self.manager, &self.config.tenant).await {
            Ok(client) => {
                progress::finish_spinner_success(&spinner, "Connected to Microsoft Graph");
                Ok(client)
            }
            Err(e) => {
                progress::finish_spinner_error(&spinner, "Microsoft Graph authentication failed");
                Err(e)
            }
        }
    }

    pub fn helpdesk(&self) -> Result<HelpdeskClient> {
        HelpdeskClient::new(&self.config.helpdesk)
    }

    pub fn audit(&self) -> AuditLog {
        AuditLog::new(&self.config.sync.audit_log)
    }
}

pub fn confirm(message: &str) -> Result<bool> {
    let result = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(message)
        .default(false)
        .interact()?;
    Ok(result)
}

/// Print a batch outcome and turn per-item failures into a non-zero exit
pub fn finish_batch(report: &BatchReport, done: &str) -> Result<()> {
    if !report.planned.is_empty() {
        println!("\n{}", "DRY RUN - No changes were made".yellow().bold());
        for item in &report.planned {
            println!("  {} {}", "•".cyan(), item);
        }
    }

    for item in &report.succeeded {
        println!("  {} {}", "✓".green(), item);
    }
    for item in &report.deferred {
        println!("  {} {} (deferred)", "…".yellow(), item);
    }
    for (item, error) in &report.failures {
        println!("  {} {}: {}", "✗".red(), item, error);
    }

    println!(
        "\n{} {}: {} done, {} deferred, {} failed",
        "→".cyan(),
        done,
        report.succeeded.len(),
        report.deferred.len(),
        report.failures.len()
    );

    if report.is_clean() {
        Ok(())
    } else {
        Err(crate::error::EduSyncError::RunIncomplete(
            report.failures.len(),
        ))
    }
}
