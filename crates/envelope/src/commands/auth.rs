//! Auth command - session management.

use anyhow::{Result, bail};
use clap::{Args, Subcommand};
use console::style;
use envelope_session::SessionState;

use super::Context;

/// Arguments for the auth command.
#[derive(Args, Debug)]
pub struct AuthArgs {
    #[command(subcommand)]
    pub command: AuthCommand,
}

#[derive(Subcommand, Debug)]
pub enum AuthCommand {
    /// Sign in with email and password
    Login {
        /// Account email
        #[arg(long)]
        email: String,
    },

    /// Show session status
    Status,

    /// Sign out and revoke the session
    Logout,

    /// Refresh the access token now
    Refresh,
}

/// Run the auth command.
pub async fn run(args: AuthArgs, ctx: &Context) -> Result<()> {
    match args.command {
        AuthCommand::Login { email } => cmd_login(&email, ctx).await,
        AuthCommand::Status => cmd_status(ctx).await,
        AuthCommand::Logout => cmd_logout(ctx).await,
        AuthCommand::Refresh => cmd_refresh(ctx).await,
    }
}

async fn cmd_login(email: &str, ctx: &Context) -> Result<()> {
    let gateway = ctx.gateway()?;
    let session = gateway.session();

    if let Ok(credential) = session.restore().await
        && !ctx.json_output
    {
        println!(
            "Replacing existing session for {}",
            style(&credential.subject_id).cyan()
        );
    }

    let password = rpassword::prompt_password(format!("Password for {}: ", email))?;
    if password.is_empty() {
        bail!("No password provided, aborting.");
    }

    let grant = ctx
        .auth_backend()?
        .sign_in_with_password(email, &password)
        .await
        .map_err(|e| anyhow::anyhow!("Sign-in failed: {}", e))?;
    let credential = session.set_grant(grant).await?;

    if ctx.json_output {
        let info = session.session_info();
        super::print_json(&serde_json::to_value(&info)?, false)?;
    } else {
        println!("{}", style("Signed in").green().bold());
        println!("  Subject: {}", style(&credential.subject_id).cyan());
        println!("  Expires: {}", session.session_info().expires_in_display());
    }

    Ok(())
}

async fn cmd_status(ctx: &Context) -> Result<()> {
    let gateway = ctx.gateway()?;
    let session = gateway.session();
    // Status is informational: a missing or unreadable session is reported, not raised.
    let _ = session.restore().await;
    let info = session.session_info();

    if ctx.json_output {
        return super::print_json(&serde_json::to_value(&info)?, false);
    }

    println!("{}", style("Session Status").bold());
    println!("--------------");
    match info.state {
        SessionState::Unauthenticated => {
            println!("Not signed in");
            println!("  Run 'envelope auth login --email <email>' to sign in");
        }
        state => {
            let state_label = match state {
                SessionState::Valid => style(state.to_string()).green(),
                SessionState::ExpiringSoon => style(state.to_string()).yellow(),
                _ => style(state.to_string()).red(),
            };
            println!("  Subject: {}", style(info.subject_id.as_deref().unwrap_or("-")).cyan());
            println!("  State:   {}", state_label);
            println!("  Expires: {}", info.expires_in_display());
            if info.degraded_expiry {
                println!(
                    "  {}",
                    style("Backend did not report a lifetime; expiry is estimated").yellow()
                );
            }
        }
    }

    Ok(())
}

async fn cmd_logout(ctx: &Context) -> Result<()> {
    let gateway = ctx.gateway()?;
    let session = gateway.session();

    if session.restore().await.is_err() {
        println!("No active session.");
        return Ok(());
    }

    session.clear_session().await?;
    println!("Signed out.");
    Ok(())
}

async fn cmd_refresh(ctx: &Context) -> Result<()> {
    let gateway = ctx.gateway()?;
    let session = gateway.session();
    session.restore().await?;

    let credential = session.refresh_now().await?;
    if ctx.json_output {
        super::print_json(&serde_json::to_value(session.session_info())?, false)?;
    } else {
        println!(
            "Session refreshed for {} (expires in {})",
            style(&credential.subject_id).cyan(),
            session.session_info().expires_in_display()
        );
    }
    Ok(())
}
