//! Query command - read records from a table.

use anyhow::{Context, Result};
use clap::Args;
use owo_colors::OwoColorize;
use serde_json::Value;

use scout_core::record::{Filter, Origin, Record};

use crate::commands::parse_assignment;
use crate::store::open_db;
use crate::{Config, OutputFormat};

/// Arguments for the query command.
#[derive(Debug, Args)]
pub struct QueryArgs {
    /// Table to read (`events`, `teams`, `runs` or `processed_teams`).
    #[arg()]
    pub table: String,

    /// Only return records whose field equals the value (`field=value`).
    #[arg(long = "filter", short = 'f', value_parser = parse_assignment)]
    pub filters: Vec<(String, Value)>,
}

/// Execute the query command.
///
/// # Errors
///
/// Returns an error if the table is unknown or the local store cannot be read.
pub async fn execute(args: QueryArgs, config: &Config) -> Result<()> {
    let db = open_db(config).await?;
    let filter = args
        .filters
        .into_iter()
        .fold(Filter::all(), |filter, (field, value)| filter.eq(field, value));

    let records = db
        .query_named(&args.table, &filter)
        .await
        .with_context(|| format!("Failed to query {}", args.table))?;

    match config.format {
        OutputFormat::Json => {
            let documents: Vec<Value> = records.iter().map(Record::to_document).collect();
            println!("{}", serde_json::to_string_pretty(&documents)?);
        }
        OutputFormat::Text => {
            if records.is_empty() {
                println!("No records found.");
                return Ok(());
            }
            for record in &records {
                println!(
                    "{} {} v{}",
                    record.key.bold(),
                    format_origin(record.origin),
                    record.version
                );
                println!("  {}", record.payload);
            }
            println!();
            println!("{} record(s)", records.len());
        }
    }

    Ok(())
}

fn format_origin(origin: Origin) -> String {
    match origin {
        Origin::Confirmed => "confirmed".green().to_string(),
        Origin::Pending => "pending".yellow().to_string(),
    }
}
