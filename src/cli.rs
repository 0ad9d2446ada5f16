use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::app;
use crate::config::{Config, load_config};

#[derive(Parser)]
#[command(name = "clinigate")]
#[command(about = "WhatsApp messaging gateway for clinic workflows")]
pub struct Cli {
    /// Path to the configuration file (default: ~/.clinigate/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway (transport + HTTP API). The default when no
    /// subcommand is given.
    Serve,
    /// Query a running gateway's connection status
    Status,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => app::run(config).await,
        Commands::Status => status(&config).await,
    }
}

async fn status(config: &Config) -> Result<()> {
    let url = format!("http://127.0.0.1:{}/status", config.gateway.port);
    let resp = reqwest::get(&url)
        .await
        .with_context(|| format!("could not reach gateway at {}", url))?;
    let body: serde_json::Value = resp
        .json()
        .await
        .context("gateway returned a malformed status body")?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
