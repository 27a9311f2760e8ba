//! Scout CLI - command-line interface for a device's local store.
//!
//! The main entry point for the `scout` CLI binary.

use anyhow::Result;
use clap::Parser;

use scout_cli::{Cli, Commands};
use scout_core::observability::init_logging;

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();
    let config = cli.config()?;

    init_logging(config.scout.log_format);
    scout_sync::metrics::register_metrics();

    // Create runtime and execute
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        match cli.command {
            Commands::Query(args) => scout_cli::commands::query::execute(args, &config).await,
            Commands::Enqueue(args) => scout_cli::commands::enqueue::execute(args, &config).await,
            Commands::Sync(args) => scout_cli::commands::sync::execute(args, &config).await,
            Commands::Pending(args) => scout_cli::commands::pending::execute(args, &config).await,
        }
    })
}
