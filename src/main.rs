use clap::{Parser, Subcommand};
use colored::Colorize;
use edusync::cmd::{self, Context};
use edusync::config::ConfigManager;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "edusync",
    about = "Keep district device groups in line with the helpdesk inventory",
    version,
    long_about = "Reconciles Entra ID device groups, Intune records and Active Directory\n\
                  computer objects against the helpdesk asset-tracking system.\n\
                  Built to run unattended from a scheduler; exit status 1 means something needs a look."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true, env = "EDUSYNC_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Authenticate to Microsoft Graph API
    Login(cmd::login::LoginArgs),

    /// Clear the cached Graph token
    Logout,

    /// Create, show or check the configuration file
    #[command(subcommand)]
    Config(cmd::config::ConfigCommands),

    /// Reconcile every configured device group
    Sync(cmd::sync::SyncArgs),

    /// Helpdesk room lookups
    #[command(subcommand)]
    Rooms(cmd::rooms::RoomsCommands),

    /// Intune device clean-up
    #[command(subcommand)]
    Devices(cmd::devices::DevicesCommands),

    /// Active Directory computer objects
    #[command(subcommand)]
    Computers(cmd::computers::ComputersCommands),

    /// Intune app assignments
    #[command(subcommand)]
    Apps(cmd::apps::AppsCommands),
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        tracing::error!("{}", e);
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "edusync=debug" } else { "edusync=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run() -> edusync::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Config commands work before a valid file exists
    let command = match cli.command {
        Commands::Config(config_cmd) => {
            let manager = ConfigManager::from_flag(cli.config.as_deref())?;
            return match config_cmd {
                cmd::config::ConfigCommands::Init(args) => cmd::config::init(&manager, args),
                cmd::config::ConfigCommands::Show => cmd::config::show(&manager),
                cmd::config::ConfigCommands::Validate => cmd::config::validate(&manager),
            };
        }
        other => other,
    };

    let ctx = Context::load(cli.config.as_deref())?;

    match command {
        Commands::Login(args) => cmd::login::login(&ctx, args).await?,
        Commands::Logout => cmd::login::logout(&ctx).await?,
        Commands::Config(_) => {}
        Commands::Sync(args) => cmd::sync::run(&ctx, args).await?,
        Commands::Rooms(rooms_cmd) => match rooms_cmd {
            cmd::rooms::RoomsCommands::Resolve(args) => cmd::rooms::resolve(&ctx, args).await?,
        },
        Commands::Devices(devices_cmd) => match devices_cmd {
            cmd::devices::DevicesCommands::PrimaryUsers(args) => {
                cmd::devices::primary_users(&ctx, args).await?
            }
            cmd::devices::DevicesCommands::Dedupe(args) => cmd::devices::dedupe(&ctx, args).await?,
            cmd::devices::DevicesCommands::Retire(args) => cmd::devices::retire(&ctx, args).await?,
        },
        Commands::Computers(computers_cmd) => match computers_cmd {
            cmd::computers::ComputersCommands::Reconcile(args) => {
                cmd::computers::reconcile(&ctx, args).await?
            }
        },
        Commands::Apps(apps_cmd) => match apps_cmd {
            cmd::apps::AppsCommands::Assignments(args) => cmd::apps::assignments(&ctx, args).await?,
        },
    }

    Ok(())
}
