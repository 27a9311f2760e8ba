//! Enqueue command - queue a local edit.

use anyhow::{Context, Result};
use clap::Args;
use owo_colors::OwoColorize;
use serde_json::{Map, Value, json};

use scout_core::table::QueueTable;

use crate::commands::parse_assignment;
use crate::store::open_db;
use crate::{Config, OutputFormat};

/// Arguments for the enqueue command.
#[derive(Debug, Args)]
pub struct EnqueueArgs {
    /// Table to write (`teams` or `runs`).
    #[arg()]
    pub table: QueueTable,

    /// Natural key field of the record (`field=value`), repeated per field.
    #[arg(long = "key", short = 'k', required = true, value_parser = parse_assignment)]
    pub key: Vec<(String, Value)>,

    /// Full record payload as a JSON object.
    #[arg(long, value_parser = parse_payload)]
    pub payload: Value,
}

fn parse_payload(raw: &str) -> Result<Value, String> {
    match serde_json::from_str(raw) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(_) => Err("payload must be a JSON object".to_string()),
        Err(e) => Err(format!("invalid JSON: {e}")),
    }
}

/// Execute the enqueue command.
///
/// # Errors
///
/// Returns an error if the key is malformed or the edit cannot be persisted.
pub async fn execute(args: EnqueueArgs, config: &Config) -> Result<()> {
    let db = open_db(config).await?;
    let fields: Map<String, Value> = args.key.into_iter().collect();

    let enqueued = db
        .add_to_queue(args.table, &Value::Object(fields), args.payload)
        .await
        .context("Failed to queue edit")?;

    match config.format {
        OutputFormat::Json => {
            let output = json!({
                "seq": enqueued.entry.seq,
                "id": enqueued.entry.id.to_string(),
                "key": enqueued.entry.key.to_string(),
                "coalesced": enqueued.coalesced,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            let action = if enqueued.coalesced {
                "Updated queued edit"
            } else {
                "Queued edit"
            };
            println!("{} {}", action.green(), enqueued.entry.key.bold());
            println!("  Sequence: {}", enqueued.entry.seq);
            println!("  Mutation: {}", enqueued.entry.id);
        }
    }

    Ok(())
}
