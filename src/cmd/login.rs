use crate::cmd::Context;
use crate::config::AuthType;
use crate::error::Result;
use crate::graph::auth::{GraphAuth, REQUIRED_SCOPES};
use clap::Args;
use colored::Colorize;

/// Safely truncate a string to n characters (not bytes) to prevent panics on non-ASCII
fn truncate_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

#[derive(Args, Debug)]
pub struct LoginArgs {
    /// Use the device code flow even when a client secret is configured
    #[arg(long)]
    pub device_code: bool,
}

pub async fn login(ctx: &Context, args: LoginArgs) -> Result<()> {
    let tenant = &ctx.config.tenant;
    let auth = GraphAuth::new(ctx.manager.clone());

    println!("  Tenant ID: {}...", truncate_chars(&tenant.tenant_id, 8));
    println!("  Client ID: {}...", truncate_chars(&tenant.client_id, 8));

    let token = if args.device_code || tenant.auth_type == AuthType::DeviceCode {
        println!("{} Using device code flow (interactive mode)", "🔐".cyan());
        auth.login_device_code(tenant).await?
    } else {
        println!(
            "{} Using client credentials flow (automation mode)",
            "🔐".cyan()
        );
        auth.login_client_credentials(tenant).await?
    };

    println!(
        "\n{} Authenticated; token valid until {}",
        "✓".green().bold(),
        token.expires_at.format("%Y-%m-%d %H:%M UTC")
    );
    println!(
        "{} The app registration needs: {}",
        "→".cyan(),
        REQUIRED_SCOPES.join(", ")
    );
    Ok(())
}

pub async fn logout(ctx: &Context) -> Result<()> {
    let auth = GraphAuth::new(ctx.manager.clone());
    auth.logout(&ctx.config.tenant)?;
    println!("{} Cached token removed", "✓".green());
    Ok(())
}
