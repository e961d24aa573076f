//! Private Storage Abstraction
//!
//! Database files live in the host application's private storage area. Where
//! that area is differs per platform, so the core asks the host through
//! [`StorageLocation`].

use async_trait::async_trait;
use std::path::PathBuf;

use crate::error::Result;

/// Storage location trait
///
/// - **Android**: `Context.getDatabasePath` parent directory
/// - **iOS**: Application Support directory inside the sandbox
/// - **Desktop**: per-user data directory (e.g. `~/.local/share/<app>`)
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::StorageLocation;
///
/// async fn db_file(storage: &dyn StorageLocation) -> Result<PathBuf> {
///     storage.file_path("inbox_nwebsql.db").await
/// }
/// ```
#[async_trait]
pub trait StorageLocation: Send + Sync {
    /// Directory that holds the database files
    ///
    /// Implementations should create the directory if it does not exist yet.
    async fn private_storage_dir(&self) -> Result<PathBuf>;

    /// Absolute path of a file inside the private storage directory
    async fn file_path(&self, file_name: &str) -> Result<PathBuf> {
        Ok(self.private_storage_dir().await?.join(file_name))
    }
}
