//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host embedding
//! the WebSQL bridge.
//!
//! ## Overview
//!
//! The bridge core sits between a JavaScript runtime living inside a host
//! application view and a native SQLite engine. Everything the core needs from
//! the host is expressed as a trait in this crate, so the same core can run
//! inside a desktop shell, a mobile web view or a test harness.
//!
//! ## Traits
//!
//! - [`JavascriptRuntime`](javascript::JavascriptRuntime) - Delivers batches of
//!   callback invocations back into the JavaScript runtime
//! - [`StorageLocation`](storage::StorageLocation) - Resolves the host's private
//!   storage area where database files live
//! - [`LoggerSink`](log::LoggerSink) - Forward structured logs to host logging
//!
//! ## Wire Types
//!
//! [`CallbackBatch`](javascript::CallbackBatch) is the single unit that crosses
//! the boundary towards JavaScript. A batch is an ordered list of
//! [`CallbackInvocation`](javascript::CallbackInvocation)s; hosts that can only
//! evaluate script text render it with
//! [`CallbackBatch::to_script`](javascript::CallbackBatch::to_script).
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Host
//! implementations should convert platform-specific failures into it and keep
//! the message actionable.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` because the core invokes them from
//! its own scheduler and dispatcher tasks.
//!
//! ## Example
//!
//! ```ignore
//! use bridge_traits::javascript::{CallbackBatch, JavascriptRuntime};
//! use bridge_traits::error::Result;
//! use async_trait::async_trait;
//!
//! pub struct WebViewRuntime {
//!     view: MyWebView,
//! }
//!
//! #[async_trait]
//! impl JavascriptRuntime for WebViewRuntime {
//!     async fn deliver(&self, batch: CallbackBatch) -> Result<()> {
//!         self.view.evaluate(batch.to_script("SQLiteNativeDB"));
//!         Ok(())
//!     }
//! }
//! ```

pub mod error;
pub mod javascript;
pub mod log;
pub mod storage;

pub use error::BridgeError;

// Re-export commonly used types
pub use javascript::{CallbackBatch, CallbackInvocation, JavascriptRuntime};
pub use log::{LogEntry, LogLevel, LoggerSink, MemoryLogger, StderrLogger};
pub use storage::StorageLocation;
