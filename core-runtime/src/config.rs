//! # Bridge Configuration
//!
//! [`BridgeConfig`] carries the host capabilities the WebSQL bridge needs and
//! the knobs that shape its scheduling and wire behaviour. It is built with
//! [`BridgeConfig::builder()`], which validates everything up front so a
//! misconfigured host fails at startup instead of on the first transaction.
//!
//! ## Required Dependencies
//!
//! - `JavascriptRuntime` - receives callback batches
//! - `StorageLocation` - private directory for database files; when the
//!   `desktop-shims` feature is enabled, `bridge_desktop::AppDataStorage` is injected if
//!   none is provided
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::BridgeConfig;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let config = BridgeConfig::builder()
//!     .javascript_runtime(Arc::new(MyWebViewRuntime::new()))
//!     .storage(Arc::new(MyStorage))
//!     .batch_window(Duration::from_millis(5))
//!     .idle_timeout(Duration::from_secs(30))
//!     .build()?;
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::BridgeConfig;
//!
//! // Missing JavascriptRuntime
//! let config = BridgeConfig::builder()
//!     .build()
//!     .expect("Should fail - missing required bridges");
//! ```

use crate::error::{Error, Result};
use bridge_traits::{JavascriptRuntime, StorageLocation};
use std::sync::Arc;
use std::time::Duration;

/// Default debounce applied to `executeSql`/`endTransaction` kicks
pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_millis(10);

/// Largest accepted batch window
pub const MAX_BATCH_WINDOW: Duration = Duration::from_secs(1);

pub const DEFAULT_FILE_SUFFIX: &str = "_nwebsql.db";

pub const DEFAULT_CALLBACK_NAMESPACE: &str = "SQLiteNativeDB";

/// How result rows are rendered into JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowEncoding {
    /// Column values keep their SQLite storage class (integer, real, text,
    /// base64 blob, null)
    #[default]
    Typed,
    /// Every non-null value is rendered as a string
    Text,
}

/// Transaction behaviour requested from SQLite on BEGIN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BeginMode {
    Deferred,
    Immediate,
    #[default]
    Exclusive,
}

impl BeginMode {
    pub fn statement(&self) -> &'static str {
        match self {
            BeginMode::Deferred => "BEGIN DEFERRED",
            BeginMode::Immediate => "BEGIN IMMEDIATE",
            BeginMode::Exclusive => "BEGIN EXCLUSIVE",
        }
    }
}

/// Configuration for the WebSQL bridge.
#[derive(Clone)]
pub struct BridgeConfig {
    /// Private storage directory for database files
    pub storage: Arc<dyn StorageLocation>,

    /// Target for callback batches
    pub javascript_runtime: Arc<dyn JavascriptRuntime>,

    /// Debounce for kicks issued by `executeSql` and `endTransaction`
    pub batch_window: Duration,

    /// Roll back a head transaction that has seen no message for this long
    pub idle_timeout: Option<Duration>,

    /// Appended to the database name to form the file name
    pub file_suffix: String,

    /// Global object the JavaScript side registers callbacks on
    pub callback_namespace: String,

    pub row_encoding: RowEncoding,

    pub begin_mode: BeginMode,

    /// Fire the open callback as an error when the database cannot be opened
    pub report_open_errors: bool,

    /// Drop a transaction whose BEGIN failed instead of retrying it on the
    /// next pass
    pub remove_on_begin_failure: bool,

    /// Capacity of the bridge event broadcast channel
    pub event_buffer_size: usize,

    /// SQLite busy timeout for each connection
    pub busy_timeout: Duration,
}

impl std::fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("storage", &"StorageLocation { ... }")
            .field("javascript_runtime", &"JavascriptRuntime { ... }")
            .field("batch_window", &self.batch_window)
            .field("idle_timeout", &self.idle_timeout)
            .field("file_suffix", &self.file_suffix)
            .field("callback_namespace", &self.callback_namespace)
            .field("row_encoding", &self.row_encoding)
            .field("begin_mode", &self.begin_mode)
            .field("report_open_errors", &self.report_open_errors)
            .field("remove_on_begin_failure", &self.remove_on_begin_failure)
            .field("event_buffer_size", &self.event_buffer_size)
            .field("busy_timeout", &self.busy_timeout)
            .finish()
    }
}

/// Name of the SQLite file backing `db_name`.
pub fn database_file_name(db_name: &str, suffix: &str) -> String {
    format!("{}{}", db_name, suffix)
}

impl BridgeConfig {
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::default()
    }

    /// File name used for the database `db_name`.
    pub fn database_file_name(&self, db_name: &str) -> String {
        database_file_name(db_name, &self.file_suffix)
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.batch_window > MAX_BATCH_WINDOW {
            return Err(Error::Config(format!(
                "Batch window of {:?} exceeds maximum of {:?}",
                self.batch_window, MAX_BATCH_WINDOW
            )));
        }

        if let Some(timeout) = self.idle_timeout {
            if timeout.is_zero() {
                return Err(Error::Config(
                    "Idle timeout must be greater than 0. Omit it to disable the timeout."
                        .to_string(),
                ));
            }
        }

        if !self.file_suffix.ends_with(".db") {
            return Err(Error::Config(format!(
                "File suffix '{}' must end with '.db'",
                self.file_suffix
            )));
        }

        if self.file_suffix.contains(|c: char| c == '/' || c == '\\') {
            return Err(Error::Config(
                "File suffix cannot contain path separators".to_string(),
            ));
        }

        if self.callback_namespace.trim().is_empty() {
            return Err(Error::Config(
                "Callback namespace cannot be empty".to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn javascript_runtime_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "JavascriptRuntime".to_string(),
        message: "A JavascriptRuntime is required to deliver callback batches. \
                 Android/iOS: wrap the web view's script evaluation. \
                 Desktop: use bridge_desktop::ScriptJavascriptRuntime or ChannelJavascriptRuntime."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_storage() -> Result<Arc<dyn StorageLocation>> {
    use bridge_desktop::AppDataStorage;

    let storage: Arc<dyn StorageLocation> = Arc::new(AppDataStorage::default());
    Ok(storage)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_storage() -> Result<Arc<dyn StorageLocation>> {
    Err(Error::CapabilityMissing {
        capability: "StorageLocation".to_string(),
        message: "A StorageLocation is required to place database files. \
                 Desktop: enable the 'desktop-shims' feature to use AppDataStorage. \
                 Mobile: return the application's private database directory."
            .to_string(),
    })
}

/// Builder for [`BridgeConfig`].
#[derive(Default)]
pub struct BridgeConfigBuilder {
    storage: Option<Arc<dyn StorageLocation>>,
    javascript_runtime: Option<Arc<dyn JavascriptRuntime>>,
    batch_window: Option<Duration>,
    idle_timeout: Option<Duration>,
    file_suffix: Option<String>,
    callback_namespace: Option<String>,
    row_encoding: RowEncoding,
    begin_mode: BeginMode,
    report_open_errors: bool,
    remove_on_begin_failure: bool,
    event_buffer_size: Option<usize>,
    busy_timeout: Option<Duration>,
}

impl BridgeConfigBuilder {
    /// Sets the storage location (required unless `desktop-shims` is enabled).
    pub fn storage(mut self, storage: Arc<dyn StorageLocation>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Sets the JavaScript runtime (required).
    pub fn javascript_runtime(mut self, runtime: Arc<dyn JavascriptRuntime>) -> Self {
        self.javascript_runtime = Some(runtime);
        self
    }

    /// Default: 10 ms
    pub fn batch_window(mut self, window: Duration) -> Self {
        self.batch_window = Some(window);
        self
    }

    /// Disabled by default.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Default: `_nwebsql.db`
    pub fn file_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.file_suffix = Some(suffix.into());
        self
    }

    /// Default: `SQLiteNativeDB`
    pub fn callback_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.callback_namespace = Some(namespace.into());
        self
    }

    pub fn row_encoding(mut self, encoding: RowEncoding) -> Self {
        self.row_encoding = encoding;
        self
    }

    pub fn begin_mode(mut self, mode: BeginMode) -> Self {
        self.begin_mode = mode;
        self
    }

    pub fn report_open_errors(mut self, enabled: bool) -> Self {
        self.report_open_errors = enabled;
        self
    }

    pub fn remove_on_begin_failure(mut self, enabled: bool) -> Self {
        self.remove_on_begin_failure = enabled;
        self
    }

    /// Default: 100
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Default: 5 s
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = Some(timeout);
        self
    }

    /// Builds the final `BridgeConfig`.
    ///
    /// Fails with [`Error::CapabilityMissing`] when a required bridge is
    /// absent and with [`Error::Config`] when a value is out of range.
    pub fn build(self) -> Result<BridgeConfig> {
        let javascript_runtime = self
            .javascript_runtime
            .ok_or_else(javascript_runtime_missing_error)?;

        let storage = match self.storage {
            Some(storage) => storage,
            None => provide_default_storage()?,
        };

        let config = BridgeConfig {
            storage,
            javascript_runtime,
            batch_window: self.batch_window.unwrap_or(DEFAULT_BATCH_WINDOW),
            idle_timeout: self.idle_timeout,
            file_suffix: self
                .file_suffix
                .unwrap_or_else(|| DEFAULT_FILE_SUFFIX.to_string()),
            callback_namespace: self
                .callback_namespace
                .unwrap_or_else(|| DEFAULT_CALLBACK_NAMESPACE.to_string()),
            row_encoding: self.row_encoding,
            begin_mode: self.begin_mode,
            report_open_errors: self.report_open_errors,
            remove_on_begin_failure: self.remove_on_begin_failure,
            event_buffer_size: self.event_buffer_size.unwrap_or(100),
            busy_timeout: self.busy_timeout.unwrap_or(Duration::from_secs(5)),
        };

        config.validate()?;

        Ok(config)
    }
}
