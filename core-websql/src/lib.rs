//! # WebSQL over SQLite
//!
//! Serves the WebSQL transaction protocol spoken by a JavaScript document
//! database from real SQLite files on the host.
//!
//! The JavaScript side sends five kinds of messages (`open`,
//! `startTransaction`, `executeSql`, `endTransaction`, `close`) and names a
//! callback id for every reply. The bridge queues transactions in arrival
//! order, runs the head transaction's statements in batches on one serial
//! task, and sends results back as [`CallbackBatch`](bridge_traits::CallbackBatch)es.
//!
//! ## Guarantees
//!
//! - Statements of one transaction run in the order they were sent.
//! - Transactions run one at a time, in the order they were started.
//! - The first failing statement halts its transaction until the host sends
//!   more work or ends it. A transaction with a failed statement never
//!   commits.
//! - Callbacks produced by one runner pass reach JavaScript in one delivery.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{AppDataStorage, ChannelJavascriptRuntime};
//! use core_runtime::BridgeConfig;
//! use core_websql::WebSqlBridge;
//! use std::sync::Arc;
//!
//! let (runtime, mut batches) = ChannelJavascriptRuntime::new();
//! let config = BridgeConfig::builder()
//!     .javascript_runtime(Arc::new(runtime))
//!     .storage(Arc::new(AppDataStorage::new("my-app")))
//!     .build()?;
//! let bridge = WebSqlBridge::new(config)?;
//!
//! bridge.open("inbox", "cb-open");
//! bridge.start_transaction(1, "inbox", "cb-start", "cb-start-err");
//! bridge.execute_sql(1, "inbox", "SELECT 1 AS one", None, "cb-q", "cb-q-err");
//! // The outcome arrives on "cb-start" (second call) or "cb-start-err".
//! bridge.end_transaction(1, "inbox", "cb-end", "cb-end-err", true);
//!
//! while let Some(batch) = batches.recv().await {
//!     webview.eval(&bridge.callback_script(&batch));
//! }
//! ```

pub mod dispatcher;
pub mod endpoint;
pub mod error;
pub mod executor;
pub mod queue;
pub mod records;
pub mod registry;
pub mod runner;
pub mod value;

pub use endpoint::WebSqlBridge;
pub use error::{Result, WebSqlError};
pub use executor::StatementKind;
pub use records::{QueryRecord, TransactionRecord, TransactionState};
pub use value::{BindValue, RowValue};
