//! PostgreSQL Restore Tool
//!
//! Restores a database from a cloud or local backup, normalizes ownership,
//! verifies the result and optionally registers it in DBeaver.

// dbrestore/src/main.rs
mod cli;
mod config;
mod errors;
mod integration;
mod restore;
mod utils;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use config::AppConfig;
use std::process::ExitCode;
use tracing::info;

/// Main entry point for the restore tool
#[tokio::main]
async fn main() -> ExitCode {
    match run_app().await {
        Ok(_) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let app_config = AppConfig::load(cli.config.as_deref()).context("Failed to load application configuration")?;

    info!("🔄 Starting Restore Process...");
    restore::run_restore_flow(&app_config, &cli.restore_request(), cli.yes)
        .await
        .context("Restore process failed")
}

fn init_logging(verbose: bool) -> Result<()> {
    let directive = if verbose { "dbrestore=debug" } else { "dbrestore=info" };
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();
    Ok(())
}
