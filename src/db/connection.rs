use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use super::{migration, Store, StoreError};

impl Store {
    /// Open (creating if necessary) the database file at `path`.
    ///
    /// Both namespaces are migrated on open so live and mock stores can share
    /// one file.
    pub async fn open(path: impl AsRef<Path>, mock: bool) -> Result<Self, StoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Invalid(format!("cannot create {}: {}", parent.display(), e)))?;
            }
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await?;

        let store = Store::from_pool(pool, mock);
        migration::run_migrations(&store).await?;

        info!(
            "Opened portfolio database at {} ({} namespace)",
            path.display(),
            if mock { "mock" } else { "live" }
        );
        Ok(store)
    }

    /// A private in-memory database, used by tests and dry runs.
    pub async fn in_memory(mock: bool) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        // Every connection to :memory: is its own database, so the pool must
        // hold exactly one connection for its whole lifetime.
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;

        let store = Store::from_pool(pool, mock);
        migration::run_migrations(&store).await?;
        Ok(store)
    }
}
