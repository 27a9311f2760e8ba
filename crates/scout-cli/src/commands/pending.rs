//! Pending command - list edits waiting to be synced.

use anyhow::Result;
use clap::Args;
use owo_colors::OwoColorize;

use crate::store::open_db;
use crate::{Config, OutputFormat};

/// Arguments for the pending command.
#[derive(Debug, Args)]
pub struct PendingArgs {
    /// Show queued payloads.
    #[arg(long, short = 'p')]
    pub payloads: bool,
}

/// Execute the pending command.
///
/// # Errors
///
/// Returns an error if the local store cannot be opened.
pub async fn execute(args: PendingArgs, config: &Config) -> Result<()> {
    let db = open_db(config).await?;
    let entries = db.pending().await;

    match config.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        OutputFormat::Text => {
            if entries.is_empty() {
                println!("{}", "Nothing to sync.".green());
                return Ok(());
            }
            println!("{:<6} {:<48} {:<9} ENQUEUED", "SEQ", "KEY", "ATTEMPTS");
            for entry in &entries {
                let attempts = if entry.attempts > 0 {
                    entry.attempts.red().to_string()
                } else {
                    entry.attempts.to_string()
                };
                println!(
                    "{:<6} {:<48} {:<9} {}",
                    entry.seq,
                    entry.key.to_string(),
                    attempts,
                    entry.enqueued_at.format("%Y-%m-%d %H:%M:%S")
                );
                if let Some(error) = &entry.last_error {
                    println!("       Last error: {}", error.red());
                }
                if args.payloads {
                    println!("       {}", entry.payload);
                }
            }
        }
    }

    Ok(())
}
