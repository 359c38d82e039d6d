//! Wiring shared by every command: config, store, remote, connectivity.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use sync_client::{
    Config, ConnectivitySignal, EntityRepository, HttpRemote, RecordMapper, SyncEngine,
};
use sync_store::SqliteStore;
use sync_types::Collection;

use crate::config;

/// Repository type used by the CLI.
pub type Repository = EntityRepository<SqliteStore, HttpRemote, RecordMapper>;

/// Opened configuration and backends.
pub struct App {
    pub config: Config,
    pub store: Arc<SqliteStore>,
    pub remote: Arc<HttpRemote>,
    pub connectivity: ConnectivitySignal,
}

impl App {
    /// Load the config at `config_path` and open the database it names.
    pub async fn open(config_path: &Path, offline: bool) -> Result<Self> {
        let config = config::load(config_path)?;
        let database = resolve_database(config_path, &config.store.database);

        let store = SqliteStore::new(&database)
            .await
            .with_context(|| format!("Failed to open database {}", database.display()))?;
        let remote =
            HttpRemote::from_config(&config.remote).context("Failed to create HTTP client")?;

        Ok(Self {
            config,
            store: Arc::new(store),
            remote: Arc::new(remote),
            connectivity: ConnectivitySignal::new(!offline),
        })
    }

    /// A sync engine over the opened backends.
    pub fn engine(&self) -> SyncEngine<SqliteStore, HttpRemote> {
        SyncEngine::new(
            Arc::clone(&self.store),
            Arc::clone(&self.remote),
            self.connectivity.clone(),
            self.config.engine_config(),
        )
    }

    /// A repository for `collection`, with its configured conflict key.
    pub fn repository(&self, collection: &str) -> Result<Repository> {
        let name = Collection::new(collection)?;
        Ok(EntityRepository::new(
            name,
            RecordMapper,
            Arc::clone(&self.store),
            Arc::clone(&self.remote),
            self.connectivity.clone(),
        )
        .with_conflict_key(self.config.conflict_key(collection))
        .with_read_timeout(Duration::from_secs(self.config.remote.timeout_secs)))
    }
}

/// A relative database path is taken relative to the config file.
pub fn resolve_database(config_path: &Path, database: &Path) -> PathBuf {
    if database.is_absolute() {
        return database.to_path_buf();
    }
    match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(database),
        _ => database.to_path_buf(),
    }
}
