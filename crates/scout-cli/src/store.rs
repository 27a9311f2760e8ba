//! Opens the device database for a command.

use std::sync::Arc;

use anyhow::{Context, Result};
use scout_sync::ScoutDb;
use scout_sync::remote::{HttpRemote, OfflineRemote, RemoteAuthority};

use crate::Config;

/// Opens the local database, talking to the configured remote authority or
/// staying offline when none is configured.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be built or the data directory
/// cannot be opened.
pub async fn open_db(config: &Config) -> Result<ScoutDb> {
    let remote: Arc<dyn RemoteAuthority> = match HttpRemote::from_config(&config.scout)
        .context("Failed to create remote client")?
    {
        Some(http) => {
            tracing::debug!(url = %http.base_url(), "using remote authority");
            Arc::new(http)
        }
        None => Arc::new(OfflineRemote),
    };

    ScoutDb::open_local(&config.scout, remote)
        .await
        .with_context(|| format!("Failed to open data directory {}", config.scout.data_dir.display()))
}
