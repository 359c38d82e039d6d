//! Write a default config and create the database.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use sync_client::Config;
use sync_store::SqliteStore;

use crate::app::resolve_database;
use crate::config;

/// Run the init command.
pub async fn run(
    config_path: &Path,
    database: Option<PathBuf>,
    base_url: Option<String>,
    force: bool,
) -> Result<()> {
    if config_path.exists() && !force {
        anyhow::bail!(
            "{} already exists. Use --force to overwrite it.",
            config_path.display()
        );
    }

    let mut config = Config::default();
    if let Some(database) = database {
        config.store.database = database;
    }
    if let Some(base_url) = base_url {
        config.remote.base_url = base_url;
    }
    config.validate()?;
    config::save(&config, config_path).await?;

    let database = resolve_database(config_path, &config.store.database);
    SqliteStore::new(&database)
        .await
        .with_context(|| format!("Failed to create database {}", database.display()))?;

    println!("fleetsync initialized");
    println!();
    println!("  Config:   {}", config_path.display());
    println!("  Database: {}", database.display());
    println!("  Remote:   {}", config.remote.base_url);
    println!();
    println!("Next steps:");
    println!("  1. Declare upsert keys under [[collections]] in the config");
    println!("  2. Queue a write: fleetsync write create <collection> '<json>'");
    println!("  3. Push it: fleetsync sync");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn init_writes_config_and_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fleetsync.toml");

        run(&path, None, Some("https://fleet.example.com".into()), false)
            .await
            .unwrap();

        assert!(dir.path().join("fleetsync.db").exists());
        let config = config::load(&path).unwrap();
        assert_eq!(config.remote.base_url, "https://fleet.example.com");
    }

    #[tokio::test]
    async fn init_refuses_to_overwrite_without_force() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fleetsync.toml");

        run(&path, None, None, false).await.unwrap();
        assert!(run(&path, None, None, false).await.is_err());
        assert!(run(&path, Some("other.db".into()), None, true).await.is_ok());
        assert!(dir.path().join("other.db").exists());
    }

    #[tokio::test]
    async fn init_rejects_invalid_url() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fleetsync.toml");

        assert!(run(&path, None, Some("ftp://nowhere".into()), false)
            .await
            .is_err());
        assert!(!path.exists());
    }
}
