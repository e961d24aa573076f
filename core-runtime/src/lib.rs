//! # Core Runtime Module
//!
//! Runtime infrastructure shared by the WebSQL bridge crates:
//! - Bridge configuration with fail-fast validation ([`config`])
//! - Logging and tracing setup ([`logging`])
//! - Event bus for observing databases and transactions ([`events`])
//!
//! The bridge core depends on this crate for everything that is not SQL or
//! scheduling: how it is configured, how it logs, and how it reports progress
//! to the host.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{BeginMode, BridgeConfig, RowEncoding};
pub use error::{Error, Result};
