//! Qloud - sandboxed media library
//!
//! Command-line entry point. Every subcommand prints one JSON reply.

mod app;

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;

fn main() -> Result<ExitCode> {
    let cli = app::Cli::parse();

    // Initialize logging and panic hook first
    app_log::init()?;

    if let Err(e) = app_log::cleanup_old_logs(7) {
        tracing::warn!("Failed to cleanup old logs: {}", e);
    }

    tracing::info!("Qloud starting...");

    let config = match &cli.config {
        Some(path) => app_core::AppConfig::load_from(path)?,
        None => app_core::AppConfig::load().unwrap_or_default(),
    };

    app::run(cli, config)
}
