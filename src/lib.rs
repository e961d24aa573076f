//! Workspace facade crate.
//!
//! Hosts can depend on `nwebsql-workspace` alone: it re-exports the bridge
//! core, its runtime configuration and the host capability traits. The
//! `desktop-shims` feature (on by default) adds the desktop implementations
//! and lets `BridgeConfig` fall back to `AppDataStorage`.

pub use bridge_traits::{
    BridgeError, CallbackBatch, CallbackInvocation, JavascriptRuntime, LoggerSink,
    StorageLocation,
};
pub use core_runtime::events::{BridgeEvent, DatabaseEvent, EventStream, TransactionEvent};
pub use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
pub use core_runtime::{BeginMode, BridgeConfig, RowEncoding};
pub use core_websql::{WebSqlBridge, WebSqlError};

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop::{AppDataStorage, ChannelJavascriptRuntime, ScriptJavascriptRuntime};
