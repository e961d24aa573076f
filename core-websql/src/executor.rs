//! Statement classification and execution.

use core_runtime::RowEncoding;
use serde_json::{json, Value};
use sqlx::sqlite::SqliteConnection;

use crate::error::{Result, WebSqlError};
use crate::records::QueryRecord;
use crate::value::{bind_raw, bind_typed, raw_binds, row_to_json, typed_binds};

/// Execution path picked from the statement's leading keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// UPDATE or DELETE; reports rows affected
    Modify,
    /// INSERT with bind arguments; reports the inserted row id
    Insert,
    /// Everything else; reports result rows, arguments bound as text
    Raw,
}

impl StatementKind {
    /// Plain prefix match on the statement after leading whitespace; a
    /// statement that opens with a comment always takes the raw path.
    pub fn classify(sql: &str, has_binds: bool) -> Self {
        let lowered = sql.trim_start().to_ascii_lowercase();
        if lowered.starts_with("update") || lowered.starts_with("delete") {
            StatementKind::Modify
        } else if lowered.starts_with("insert") && has_binds {
            StatementKind::Insert
        } else {
            StatementKind::Raw
        }
    }
}

/// Payload sent to an error callback: `{type: "error", result: <message>}`.
pub fn error_payload(error: &WebSqlError) -> Value {
    json!({ "type": "error", "result": error.js_message() })
}

/// Run one statement on an already locked connection.
pub async fn execute_query(
    connection: &mut SqliteConnection,
    query: &QueryRecord,
    encoding: RowEncoding,
) -> Result<Value> {
    let kind = StatementKind::classify(&query.sql, !query.bind_args.is_empty());

    match kind {
        StatementKind::Modify => {
            let statement = bind_typed(sqlx::query(&query.sql), typed_binds(&query.bind_args));
            let outcome = statement.execute(&mut *connection).await?;
            Ok(json!({ "rowsAffected": outcome.rows_affected() }))
        }
        StatementKind::Insert => {
            let statement = bind_typed(sqlx::query(&query.sql), typed_binds(&query.bind_args));
            let outcome = statement.execute(&mut *connection).await?;
            let insert_id = if outcome.rows_affected() > 0 {
                outcome.last_insert_rowid()
            } else {
                -1
            };
            let rows_affected = if insert_id == -1 { 0 } else { 1 };
            Ok(json!({ "insertId": insert_id, "rowsAffected": rows_affected }))
        }
        StatementKind::Raw => {
            let statement = bind_raw(sqlx::query(&query.sql), raw_binds(&query.bind_args));
            let rows = statement.fetch_all(&mut *connection).await?;
            let rows = rows
                .iter()
                .map(|row| row_to_json(row, encoding))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(json!({ "rows": rows }))
        }
    }
}
