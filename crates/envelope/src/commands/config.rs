//! Config command - configuration inspection.

use anyhow::Result;
use clap::{Args, Subcommand};
use console::style;

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the merged configuration
    Show,

    /// Show which config files were checked and loaded
    Which,
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Which => cmd_which(ctx),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let mut config = ctx.loaded.config.clone();
    if let Some(backend) = config.backend.as_mut()
        && let Some(key) = backend.api_key.as_mut()
    {
        *key = mask(key);
    }

    if ctx.json_output {
        return super::print_json(&serde_json::to_value(&config)?, false);
    }

    println!("{}", style("Resolved configuration").bold());
    println!();
    let text = config.to_toml()?;
    if text.trim().is_empty() {
        println!("(defaults only, no config files loaded)");
    } else {
        println!("{}", text);
    }
    Ok(())
}

fn cmd_which(ctx: &Context) -> Result<()> {
    println!("{}", style("Config sources (lowest precedence first)").bold());
    for source in &ctx.loaded.sources {
        let marker = if source.loaded {
            style("loaded").green()
        } else {
            style("not found").dim()
        };
        println!("  {} [{}]", source.path.display(), marker);
    }
    for warning in &ctx.loaded.warnings {
        println!("  {} {}", style("warning:").yellow(), warning);
    }
    Ok(())
}

fn mask(secret: &str) -> String {
    if secret.len() > 8 {
        format!("{}...{}", &secret[..4], &secret[secret.len() - 4..])
    } else {
        "****".to_string()
    }
}
