//! byteprovider - inspect and manipulate files through the provider kernel
//!
//! Every operation goes through `LocalFileSystem`, so names are handled as
//! raw bytes and copies report progress the same way a file manager sees it.

mod commands;

use anyhow::Result;
use clap::Parser;
use commands::Cli;
use provider_common::ProviderConfig;

fn main() -> Result<()> {
    let cli = Cli::parse();

    provider_log::init(&provider_log::LogOptions {
        directory: cli.log_dir.clone(),
        verbose: cli.verbose,
    })?;

    let log_dir = cli.log_dir.clone().unwrap_or_else(provider_log::log_dir);
    if let Err(e) = provider_log::cleanup_old_logs(&log_dir, 7) {
        tracing::warn!("Failed to cleanup old logs: {}", e);
    }

    let config = match &cli.config {
        Some(path) => ProviderConfig::load_from(path)?,
        None => ProviderConfig::load().unwrap_or_else(|e| {
            tracing::warn!("Using default configuration: {}", e);
            ProviderConfig::default()
        }),
    };

    commands::run(cli.command, &config)
}
