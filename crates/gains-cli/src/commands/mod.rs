pub mod authorize;
pub mod balance;
pub mod import_1099;

use std::path::Path;

use anyhow::{Context, Result};
use gains_config::{load_config, ServiceSettings};
use gains_db::{PgLedgerStore, PgPool};

/// `GAINS_DATABASE_URL` if set, else `DBConnectionString` from the config
/// file.
pub async fn connect(config_path: &Path) -> Result<PgPool> {
    let settings = ServiceSettings::from_env().context("invalid service settings")?;
    let url = match &settings.database_url {
        Some(url) => url.clone(),
        None => settings.resolve_database_url(&load_config(config_path)?)?,
    };
    gains_db::connect(&url, settings.request_timeout).await
}

pub async fn open_store(config_path: &Path) -> Result<PgLedgerStore> {
    Ok(PgLedgerStore::new(connect(config_path).await?))
}
