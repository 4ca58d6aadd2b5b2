use crate::config::{Config, ConfigManager};
use crate::error::{EduSyncError, Result};
use clap::{Args, Subcommand};
use colored::Colorize;

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Write a starter configuration file
    Init(InitArgs),

    /// Print the effective configuration (secrets masked)
    Show,

    /// Check the configuration without contacting any service
    Validate,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

pub fn init(manager: &ConfigManager, args: InitArgs) -> Result<()> {
    if manager.config_file().exists() && !args.force {
        return Err(EduSyncError::ConfigError(format!(
            "{} already exists; pass --force to overwrite it",
            manager.config_file().display()
        )));
    }

    manager.save_config(&Config::starter())?;
    println!(
        "{} Starter configuration written to {}",
        "✓".green().bold(),
        manager.config_file().display()
    );
    println!(
        "{} Fill in [tenant] and [helpdesk], then run 'edusync config validate'",
        "→".cyan()
    );
    Ok(())
}

const MASK: &str = "********";

/// Copy of the configuration with every secret replaced
pub fn masked(config: &Config) -> Config {
    let mut copy = config.clone();
    if copy.tenant.client_secret.is_some() {
        copy.tenant.client_secret = Some(MASK.to_string());
    }
    if !copy.helpdesk.api_token.is_empty() {
        copy.helpdesk.api_token = MASK.to_string();
    }
    copy
}

pub fn show(manager: &ConfigManager) -> Result<()> {
    let config = manager.load_config()?;
    let text = toml::to_string_pretty(&masked(&config))
        .map_err(|e| EduSyncError::ConfigError(format!("Failed to serialize config: {}", e)))?;

    println!("# {}", manager.config_file().display());
    println!("{}", text);
    Ok(())
}

pub fn validate(manager: &ConfigManager) -> Result<()> {
    let config = manager.load_config()?;
    let problems = config.validate()?;

    if problems.is_empty() {
        println!(
            "{} {} is valid ({} target group(s), {} building code(s))",
            "✓".green().bold(),
            manager.config_file().display(),
            config.target_groups().len(),
            config.buildings.len()
        );
        return Ok(());
    }

    for problem in &problems {
        println!("  {} {}", "✗".red(), problem);
    }
    Err(EduSyncError::ConfigError(format!(
        "{} problem(s) found in {}",
        problems.len(),
        manager.config_file().display()
    )))
}
