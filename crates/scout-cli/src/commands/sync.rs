//! Sync command - push queued edits and pull remote changes.

use anyhow::{Result, bail};
use clap::Args;
use owo_colors::OwoColorize;

use scout_core::key::NaturalKey;
use scout_sync::prelude::CancellationToken;
use scout_sync::remote::Credential;
use scout_sync::{SyncOutcome, SyncStatus};

use crate::store::open_db;
use crate::{Config, OutputFormat};

/// Arguments for the sync command.
#[derive(Debug, Args)]
pub struct SyncArgs {
    /// Credential presented to the remote authority.
    #[arg(long, env = "SCOUT_TOKEN", hide_env_values = true)]
    pub token: String,
}

/// Execute the sync command.
///
/// Ctrl-C cancels the pass; unprocessed edits stay queued.
///
/// # Errors
///
/// Returns an error if the local store fails or the pass fails as a whole
/// (rejected credential, failed pull, cancellation).
pub async fn execute(args: SyncArgs, config: &Config) -> Result<()> {
    let db = open_db(config).await?;
    if config.scout.remote_url.is_none() {
        tracing::warn!("no remote configured; queued edits will stay pending");
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let outcome = db.sync_with_cancel(&Credential::new(args.token), cancel).await;
    interrupt.abort();
    let outcome = outcome?;
    db.shutdown().await?;

    match config.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        OutputFormat::Text => print_outcome(&outcome),
    }

    if let Some(failure) = outcome.fatal {
        bail!("Sync failed: {failure}");
    }
    Ok(())
}

fn print_outcome(outcome: &SyncOutcome) {
    println!("Sync: {}", format_status(outcome.status()));
    print_keys("Confirmed", &outcome.succeeded);
    print_keys("Overridden", &outcome.conflicted);
    print_keys("Pending", &outcome.pending);
    println!("  Pulled:     {}", outcome.pulled);
}

fn print_keys(label: &str, keys: &[NaturalKey]) {
    println!("  {:<11} {}", format!("{label}:"), keys.len());
    for key in keys {
        println!("    {key}");
    }
}

fn format_status(status: SyncStatus) -> String {
    let label = status.as_str().to_uppercase();
    match status {
        SyncStatus::Clean => label.green().to_string(),
        SyncStatus::Overridden | SyncStatus::Pending => label.yellow().to_string(),
        SyncStatus::Failed => label.red().to_string(),
    }
}
