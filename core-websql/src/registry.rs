//! Database name → SQLite connection.
//!
//! Each handle owns at most one connection, opened on first use and guarded
//! by an async mutex so compile, bind, execute and BEGIN/COMMIT never
//! interleave on the same file.

use bridge_traits::StorageLocation;
use core_runtime::config::database_file_name;
use core_runtime::logging::strip_path;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqliteSynchronous};
use sqlx::Connection;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{MappedMutexGuard, Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tracing::{debug, info, warn};

use crate::error::{Result, WebSqlError};

pub struct DatabaseHandle {
    name: String,
    file_name: String,
    storage: Arc<dyn StorageLocation>,
    busy_timeout: Duration,
    connection: AsyncMutex<Option<SqliteConnection>>,
    closed: AtomicBool,
}

impl DatabaseHandle {
    fn new(
        name: &str,
        file_name: String,
        storage: Arc<dyn StorageLocation>,
        busy_timeout: Duration,
    ) -> Self {
        Self {
            name: name.to_string(),
            file_name,
            storage,
            busy_timeout,
            connection: AsyncMutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Lock the handle, opening the connection if this is its first use.
    pub async fn connection(&self) -> Result<MappedMutexGuard<'_, SqliteConnection>> {
        let mut guard = self.connection.lock().await;

        if guard.is_none() {
            if self.is_closed() {
                return Err(WebSqlError::DatabaseNotOpen(self.name.clone()));
            }
            *guard = Some(self.connect().await?);
        }

        AsyncMutexGuard::try_map(guard, |connection| connection.as_mut())
            .map_err(|_| WebSqlError::DatabaseNotOpen(self.name.clone()))
    }

    async fn connect(&self) -> Result<SqliteConnection> {
        let path = self.storage.file_path(&self.file_name).await?;
        debug!(
            db_name = %self.name,
            file = %strip_path(&path.to_string_lossy()),
            "Opening SQLite connection"
        );

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(self.busy_timeout);

        let connection = SqliteConnection::connect_with(&options).await?;
        info!(db_name = %self.name, "Database opened");
        Ok(connection)
    }

    /// Close the connection; later `connection()` calls fail.
    pub async fn close(&self) {
        let mut guard = self.connection.lock().await;
        self.closed.store(true, Ordering::SeqCst);

        if let Some(connection) = guard.take() {
            if let Err(e) = connection.close().await {
                warn!(db_name = %self.name, error = %e, "Error while closing database");
            } else {
                debug!(db_name = %self.name, "Database closed");
            }
        }
    }
}

impl std::fmt::Debug for DatabaseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseHandle")
            .field("name", &self.name)
            .field("file_name", &self.file_name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

pub struct DatabaseRegistry {
    handles: Mutex<HashMap<String, Arc<DatabaseHandle>>>,
    storage: Arc<dyn StorageLocation>,
    file_suffix: String,
    busy_timeout: Duration,
}

impl DatabaseRegistry {
    pub fn new(storage: Arc<dyn StorageLocation>, file_suffix: impl Into<String>, busy_timeout: Duration) -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
            storage,
            file_suffix: file_suffix.into(),
            busy_timeout,
        }
    }

    /// Existing handle for `name`, or a new unconnected one. The flag is
    /// `true` when the handle was created by this call.
    pub fn get_or_create(&self, name: &str) -> (Arc<DatabaseHandle>, bool) {
        let mut handles = self.handles.lock();
        if let Some(handle) = handles.get(name) {
            return (Arc::clone(handle), false);
        }

        let handle = Arc::new(DatabaseHandle::new(
            name,
            database_file_name(name, &self.file_suffix),
            Arc::clone(&self.storage),
            self.busy_timeout,
        ));
        handles.insert(name.to_string(), Arc::clone(&handle));
        (handle, true)
    }

    pub fn get(&self, name: &str) -> Option<Arc<DatabaseHandle>> {
        self.handles.lock().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }

    /// Detach every handle; the caller closes them.
    pub fn drain(&self) -> Vec<Arc<DatabaseHandle>> {
        self.handles.lock().drain().map(|(_, handle)| handle).collect()
    }
}
