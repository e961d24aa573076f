//! Value marshalling between JSON and SQLite.
//!
//! Bind arguments arrive as a JSON array. Statements on the typed path
//! (UPDATE, DELETE, INSERT with arguments) bind [`BindValue`]s that keep
//! the SQLite storage class; every other statement binds plain strings.
//! Result rows come back as [`RowValue`]s and are rendered to JSON objects.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use core_runtime::RowEncoding;
use serde_json::{Map, Number, Value};
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Column, Row, Sqlite, TypeInfo, ValueRef};
use tracing::warn;

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Typed bind argument.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Null,
    Integer(i64),
    Double(f64),
    Text(String),
    /// Booleans, integers beyond `i64`, arrays and objects, bound as the
    /// text of their JSON form
    Other(String),
}

impl BindValue {
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => BindValue::Null,
            Value::String(s) => BindValue::Text(s.clone()),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    BindValue::Integer(i)
                } else if n.is_f64() {
                    n.as_f64()
                        .map(BindValue::Double)
                        .unwrap_or_else(|| BindValue::Other(n.to_string()))
                } else {
                    BindValue::Other(n.to_string())
                }
            }
            other => BindValue::Other(other.to_string()),
        }
    }
}

/// Parse the `bindArgsJson` message field.
///
/// Absent or blank input means no arguments. Input that is not a JSON array
/// is logged and treated as no arguments.
pub fn parse_bind_args(bind_args_json: Option<&str>) -> Vec<Value> {
    let Some(raw) = bind_args_json.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Vec::new();
    };

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(values)) => values,
        Ok(Value::Null) => Vec::new(),
        Ok(other) => {
            warn!(args = %other, "Bind arguments are not a JSON array, ignoring");
            Vec::new()
        }
        Err(e) => {
            warn!(error = %e, "Malformed bind arguments, ignoring");
            Vec::new()
        }
    }
}

pub fn typed_binds(args: &[Value]) -> Vec<BindValue> {
    args.iter().map(BindValue::from_json).collect()
}

/// Raw-path arguments: null becomes the empty string, strings are passed
/// unquoted, everything else as its JSON text.
pub fn raw_binds(args: &[Value]) -> Vec<String> {
    args.iter()
        .map(|value| match value {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect()
}

pub(crate) fn bind_typed<'q>(mut query: SqliteQuery<'q>, values: Vec<BindValue>) -> SqliteQuery<'q> {
    for value in values {
        query = match value {
            BindValue::Null => query.bind(None::<i64>),
            BindValue::Integer(i) => query.bind(i),
            BindValue::Double(d) => query.bind(d),
            BindValue::Text(s) | BindValue::Other(s) => query.bind(s),
        };
    }
    query
}

pub(crate) fn bind_raw<'q>(mut query: SqliteQuery<'q>, values: Vec<String>) -> SqliteQuery<'q> {
    for value in values {
        query = query.bind(value);
    }
    query
}

/// Column value read back from SQLite.
#[derive(Debug, Clone, PartialEq)]
pub enum RowValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl RowValue {
    pub fn to_json(&self, encoding: RowEncoding) -> Value {
        match (self, encoding) {
            (RowValue::Null, _) => Value::Null,
            (RowValue::Integer(i), RowEncoding::Typed) => Value::from(*i),
            (RowValue::Integer(i), RowEncoding::Text) => Value::String(i.to_string()),
            (RowValue::Real(f), RowEncoding::Typed) => {
                Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null)
            }
            (RowValue::Real(f), RowEncoding::Text) => Value::String(f.to_string()),
            (RowValue::Text(s), _) => Value::String(s.clone()),
            (RowValue::Blob(bytes), _) => Value::String(STANDARD.encode(bytes)),
        }
    }

    /// Read column `index`, picking the variant from the value's storage class.
    pub fn read(row: &SqliteRow, index: usize) -> Result<Self, sqlx::Error> {
        let raw = row.try_get_raw(index)?;
        if raw.is_null() {
            return Ok(RowValue::Null);
        }

        let storage_class = raw.type_info().name().to_string();
        let value = match storage_class.as_str() {
            "INTEGER" => RowValue::Integer(row.try_get_unchecked(index)?),
            "REAL" => RowValue::Real(row.try_get_unchecked(index)?),
            "BLOB" => RowValue::Blob(row.try_get_unchecked(index)?),
            _ => RowValue::Text(row.try_get_unchecked(index)?),
        };
        Ok(value)
    }
}

/// Render a result row as `{column: value, ...}`.
pub fn row_to_json(row: &SqliteRow, encoding: RowEncoding) -> Result<Value, sqlx::Error> {
    let mut object = Map::with_capacity(row.columns().len());
    for column in row.columns() {
        let value = RowValue::read(row, column.ordinal())?;
        object.insert(column.name().to_string(), value.to_json(encoding));
    }
    Ok(Value::Object(object))
}
