//! SQLite [`SourceReader`]: reads rows above the watermark and purges
//! ranges that were confirmed downstream.
//!
//! One connection, serialized behind a mutex. All SQLite work runs on
//! the blocking thread pool.

mod config;
mod query;

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine;
use rusqlite::types::ValueRef;
use rusqlite::{params_from_iter, Connection, OpenFlags};

use sync_api::{FieldValue, Record, Recordset, SourceReader, StoreError, Timestamp};

pub use config::{parse_engine_url, SqliteLocation, SqliteTableConfig};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn sqlite_err(e: rusqlite::Error) -> StoreError {
    StoreError::io(format!("sqlite: {e}"))
}

// ═══════════════════════════════════════════════════════════════
//  SqliteReader
// ═══════════════════════════════════════════════════════════════

pub struct SqliteReader {
    conn: Arc<Mutex<Connection>>,
    tables: HashMap<String, SqliteTableConfig>,
}

impl SqliteReader {
    /// Открыть базу по connection string (см. [`parse_engine_url`]).
    ///
    /// Файл базы должен существовать: опечатка в пути не должна молча
    /// создавать пустую базу.
    pub fn open(
        engine: &str,
        tables: HashMap<String, SqliteTableConfig>,
    ) -> Result<Self, StoreError> {
        let conn = match parse_engine_url(engine)? {
            SqliteLocation::Memory => Connection::open_in_memory().map_err(sqlite_err)?,
            SqliteLocation::File(path) => Self::open_file(&path)?,
        };
        conn.busy_timeout(BUSY_TIMEOUT).map_err(sqlite_err)?;
        tracing::info!(engine, tables = tables.len(), "opened sqlite source");
        Ok(Self::from_connection(conn, tables))
    }

    fn open_file(path: &Path) -> Result<Connection, StoreError> {
        if !path.exists() {
            return Err(StoreError::config(format!(
                "sqlite database '{}' does not exist",
                path.display()
            )));
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        Connection::open_with_flags(path, flags)
            .map_err(|e| StoreError::io(format!("sqlite open '{}': {e}", path.display())))
    }

    /// Обернуть готовое соединение (in-memory базы в тестах).
    pub fn from_connection(conn: Connection, tables: HashMap<String, SqliteTableConfig>) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            tables,
        }
    }

    /// Таблицы без явной конфигурации читаются с настройками по умолчанию.
    fn table_config(&self, table: &str) -> SqliteTableConfig {
        self.tables.get(table).cloned().unwrap_or_default()
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| StoreError::new("sqlite connection lock poisoned"))?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::io(format!("sqlite task: {e}")))?
    }
}

impl SourceReader for SqliteReader {
    fn read<'a>(
        &'a self,
        table: &'a str,
        start: Option<Timestamp>,
    ) -> Pin<Box<dyn Future<Output = Result<Recordset, StoreError>> + Send + 'a>> {
        let cfg = self.table_config(table);
        let table = table.to_string();
        Box::pin(async move {
            let recordset = self.with_conn(move |conn| read_rows(conn, &table, &cfg, start)).await?;
            tracing::debug!(table = %recordset.table(), rows = recordset.len(), "sqlite read");
            Ok(recordset)
        })
    }

    fn delete<'a>(
        &'a self,
        table: &'a str,
        start: Option<Timestamp>,
        end: Option<Timestamp>,
    ) -> Pin<Box<dyn Future<Output = Result<u64, StoreError>> + Send + 'a>> {
        let cfg = self.table_config(table);
        let owned = table.to_string();
        Box::pin(async move {
            let deleted = self
                .with_conn(move |conn| {
                    let stmt = query::delete(&owned, &cfg, start, end);
                    conn.execute(&stmt.sql, params_from_iter(stmt.params.iter()))
                        .map_err(sqlite_err)
                })
                .await?;
            tracing::debug!(table, deleted, "sqlite delete");
            Ok(deleted as u64)
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  Row decoding
// ═══════════════════════════════════════════════════════════════

fn read_rows(
    conn: &Connection,
    table: &str,
    cfg: &SqliteTableConfig,
    start: Option<Timestamp>,
) -> Result<Recordset, StoreError> {
    let select = query::select(table, cfg, start);
    let mut stmt = conn.prepare(&select.sql).map_err(sqlite_err)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let ts_idx = names
        .iter()
        .position(|n| *n == cfg.timestamp_column)
        .ok_or_else(|| {
            StoreError::format_err(format!(
                "table '{table}' has no timestamp column '{}'",
                cfg.timestamp_column
            ))
        })?;

    let mut rows = stmt.query(params_from_iter(select.params.iter())).map_err(sqlite_err)?;
    let mut records = Vec::new();
    while let Some(row) = rows.next().map_err(sqlite_err)? {
        let timestamp = match row.get_ref(ts_idx).map_err(sqlite_err)? {
            ValueRef::Integer(i) => cfg.timestamp_unit.to_timestamp(i)?,
            ValueRef::Real(f) => cfg.timestamp_unit.float_to_timestamp(f)?,
            other => {
                return Err(StoreError::format_err(format!(
                    "table '{table}': timestamp column '{}' holds {} value",
                    cfg.timestamp_column,
                    other.data_type()
                )));
            }
        };

        let mut record = Record::new(timestamp);
        for (i, name) in names.iter().enumerate() {
            if i == ts_idx {
                continue;
            }
            let value = field_value(row.get_ref(i).map_err(sqlite_err)?);
            record.fields.push((name.clone(), value));
        }
        records.push(record);
    }

    Ok(Recordset::new(table, records))
}

fn field_value(value: ValueRef<'_>) -> FieldValue {
    match value {
        ValueRef::Null => FieldValue::Null,
        ValueRef::Integer(i) => FieldValue::Integer(i),
        ValueRef::Real(f) => FieldValue::Float(f),
        ValueRef::Text(bytes) => FieldValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => {
            FieldValue::Text(base64::engine::general_purpose::STANDARD.encode(bytes))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blobs_become_base64_text() {
        assert_eq!(
            field_value(ValueRef::Blob(&[0xde, 0xad, 0xbe, 0xef])),
            FieldValue::Text("3q2+7w==".into())
        );
        assert_eq!(field_value(ValueRef::Text(b"north")), FieldValue::Text("north".into()));
        assert_eq!(field_value(ValueRef::Null), FieldValue::Null);
    }
}
