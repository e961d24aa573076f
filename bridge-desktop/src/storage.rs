//! Private storage directory backed by the per-user data directory

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::StorageLocation,
};
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;

/// Database directory under the platform data dir
///
/// - Linux: `~/.local/share/<app>/databases`
/// - macOS: `~/Library/Application Support/<app>/databases`
/// - Windows: `%APPDATA%\<app>\databases`
pub struct AppDataStorage {
    dir: PathBuf,
}

impl AppDataStorage {
    pub fn new(app_name: &str) -> Self {
        let dir = dirs::data_dir()
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".local")
                    .join("share")
            })
            .join(app_name)
            .join("databases");

        Self { dir }
    }

    /// Use an explicit directory (tests, portable installs)
    pub fn with_directory(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn directory(&self) -> &PathBuf {
        &self.dir
    }
}

impl Default for AppDataStorage {
    fn default() -> Self {
        Self::new("nwebsql")
    }
}

#[async_trait]
impl StorageLocation for AppDataStorage {
    async fn private_storage_dir(&self) -> Result<PathBuf> {
        if !fs::try_exists(&self.dir).await.map_err(BridgeError::Io)? {
            fs::create_dir_all(&self.dir).await.map_err(BridgeError::Io)?;
            debug!(path = ?self.dir, "Created database directory");
        }
        Ok(self.dir.clone())
    }
}
