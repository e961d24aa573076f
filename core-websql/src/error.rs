use bridge_traits::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WebSqlError {
    #[error("{0}")]
    Database(#[from] sqlx::Error),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("database not open: {0}")]
    DatabaseNotOpen(String),

    /// Message text is what the JavaScript layer matches on.
    #[error("transaction was invalidated")]
    TransactionNotFound(i64),

    #[error("transaction timed out")]
    TimedOut(i64),

    /// Commit requested, but a statement failed before the host could react.
    #[error("transaction rolled back: {0}")]
    RolledBack(String),

    #[error("bridge is shut down")]
    ShutDown,
}

impl WebSqlError {
    /// Text placed in the `result` field of an error payload.
    ///
    /// SQLite errors are reported with the engine's own message
    /// (`no such table: t`), without the driver's prefix.
    pub fn js_message(&self) -> String {
        match self {
            WebSqlError::Database(sqlx::Error::Database(db)) => db.message().to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, WebSqlError>;
