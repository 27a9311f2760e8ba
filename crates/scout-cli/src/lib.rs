//! # scout-cli
//!
//! Command-line interface for a scout device's local store.
//!
//! ## Commands
//!
//! - `scout query` - Read records from a table
//! - `scout enqueue` - Queue a local edit of a team or match run
//! - `scout sync` - Push queued edits and pull remote changes
//! - `scout pending` - List edits waiting to be synced
//!
//! ## Configuration
//!
//! Flags fall back to environment variables:
//!
//! - `SCOUT_DATA_DIR` - Local data directory (default: `.scout`)
//! - `SCOUT_REMOTE_URL` - Remote authority base URL; offline when unset
//! - `SCOUT_DEVICE_ID` - Identifier attached to pushes
//! - `SCOUT_TOKEN` - Credential presented by `scout sync`
//!
//! Timeouts and log format are read from `SCOUT_REQUEST_TIMEOUT_SECS`,
//! `SCOUT_CONNECT_TIMEOUT_SECS` and `SCOUT_LOG_FORMAT`.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
// CLI uses print! macros intentionally
#![allow(clippy::print_stdout)]
#![allow(clippy::print_stderr)]

pub mod commands;
pub mod store;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use scout_core::config::ScoutConfig;
use scout_core::id::DeviceId;

/// Scout CLI - local-first scouting data store.
#[derive(Debug, Parser)]
#[command(name = "scout")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Local data directory.
    #[arg(long, env = "SCOUT_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Remote authority base URL.
    #[arg(long, env = "SCOUT_REMOTE_URL")]
    pub remote_url: Option<String>,

    /// Device identifier attached to pushes.
    #[arg(long, env = "SCOUT_DEVICE_ID")]
    pub device_id: Option<String>,

    /// Never contact the remote authority, even if a URL is configured.
    #[arg(long)]
    pub offline: bool,

    /// Output format.
    #[arg(long, default_value = "text")]
    pub format: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Get the effective configuration: environment settings with flags
    /// layered on top.
    ///
    /// # Errors
    ///
    /// Returns an error if an environment variable or flag is malformed.
    pub fn config(&self) -> Result<Config> {
        let scout = ScoutConfig::from_env().context("Invalid SCOUT_* environment")?;
        self.apply(scout)
    }

    fn apply(&self, mut scout: ScoutConfig) -> Result<Config> {
        if let Some(dir) = &self.data_dir {
            scout.data_dir.clone_from(dir);
        }
        if self.offline {
            scout.remote_url = None;
        } else if let Some(url) = &self.remote_url {
            scout.remote_url = Some(url.clone());
        }
        if let Some(device) = &self.device_id {
            scout.device_id = DeviceId::new(device.clone()).context("Invalid --device-id")?;
        }
        scout.validate().context("Invalid configuration")?;

        Ok(Config {
            scout,
            format: self.format.clone(),
        })
    }
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Read records from a table.
    Query(commands::query::QueryArgs),
    /// Queue a local edit.
    Enqueue(commands::enqueue::EnqueueArgs),
    /// Push queued edits and pull remote changes.
    Sync(commands::sync::SyncArgs),
    /// List edits waiting to be synced.
    Pending(commands::pending::PendingArgs),
}

/// Output format.
#[derive(Debug, Clone, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output.
    Json,
}

/// CLI configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Device settings.
    pub scout: ScoutConfig,
    /// Output format.
    pub format: OutputFormat,
}
