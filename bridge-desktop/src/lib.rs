//! # Desktop Bridge Implementations
//!
//! Default implementations of the host traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - [`AppDataStorage`] keeps database files in the per-user data directory
//!   resolved by the `dirs` crate
//! - [`ChannelJavascriptRuntime`] hands callback batches to an in-process
//!   channel, for hosts that forward them over IPC
//! - [`ScriptJavascriptRuntime`] renders each batch to script text and passes
//!   it to a host-supplied evaluator (webview `eval`)
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{AppDataStorage, ScriptJavascriptRuntime};
//!
//! let storage = AppDataStorage::new("my-app");
//! let runtime = ScriptJavascriptRuntime::new("SQLiteNativeDB", move |script| {
//!     webview.eval(&script);
//!     Ok(())
//! });
//! ```

mod javascript;
mod storage;

pub use javascript::{ChannelJavascriptRuntime, ScriptJavascriptRuntime};
pub use storage::AppDataStorage;
