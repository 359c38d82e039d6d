//! Configuration file handling for the fleetsync CLI.

use anyhow::{Context, Result};
use std::path::Path;
use sync_client::Config;

/// Load and validate the configuration file.
pub fn load(path: &Path) -> Result<Config> {
    Config::from_file(path).with_context(|| {
        format!(
            "Failed to load {}. Run 'fleetsync init' first.",
            path.display()
        )
    })
}

/// Write `config` to `path`, readable by the owner only (it may hold an API key).
pub async fn save(config: &Config, path: &Path) -> Result<()> {
    let contents = config.to_toml()?;
    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    set_file_permissions_0600(path).await?;
    Ok(())
}

/// Set file permissions to 0600 (owner read/write only) on Unix.
/// No-op on non-Unix platforms.
async fn set_file_permissions_0600(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .context("Failed to set file permissions")?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}
