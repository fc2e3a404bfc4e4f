//! Storage implementations.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::info;

use crate::config::StorageConfig;
use crate::error::Result;

pub mod schema;
pub mod sqlite;

pub use sqlite::SqliteLedger;
pub(crate) use sqlite::NewCommission;

/// Open the ledger database and initialize its schema.
///
/// Foreign keys are enabled on every connection so cascading deletes
/// (user → subtree → sales → commissions) actually fire.
pub async fn connect(config: &StorageConfig) -> Result<SqliteLedger> {
    info!("Ledger storage: sqlite at {}", config.path);

    if config.path != ":memory:" {
        if let Some(parent) = std::path::Path::new(&config.path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
            }
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(&config.path)
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;

    let ledger = SqliteLedger::new(pool);
    ledger.init().await?;
    Ok(ledger)
}
