use std::path::PathBuf;

use serde::Deserialize;

use sync_api::{StoreError, TimeUnit};

/// Настройки чтения одной таблицы source'а.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SqliteTableConfig {
    /// Колонка с timestamp'ом строки (ключ упорядочивания).
    #[serde(default = "default_timestamp_column")]
    pub timestamp_column: String,
    /// Единица сырого значения timestamp-колонки.
    #[serde(default)]
    pub timestamp_unit: TimeUnit,
    /// Проекция колонок. None: все колонки (`SELECT *`).
    /// Timestamp-колонка добавляется автоматически, если её нет в списке.
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    /// SQL-условие, которое добавляется через AND и к чтению, и к
    /// удалению: строки вне фильтра не читаются и не удаляются.
    #[serde(default, alias = "where")]
    pub where_condition: Option<String>,
}

impl Default for SqliteTableConfig {
    fn default() -> Self {
        Self {
            timestamp_column: default_timestamp_column(),
            timestamp_unit: TimeUnit::default(),
            columns: None,
            where_condition: None,
        }
    }
}

fn default_timestamp_column() -> String {
    "timestamp".into()
}

/// Где лежит база, разобранная из connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqliteLocation {
    Memory,
    File(PathBuf),
}

/// Разобрать connection string в стиле SQLAlchemy:
///
/// - `sqlite:///relative/path.db` → `relative/path.db`
/// - `sqlite:////abs/path.db` → `/abs/path.db`
/// - `sqlite://`, `sqlite:///:memory:`, `:memory:` → in-memory
/// - строка без схемы → путь к файлу как есть
pub fn parse_engine_url(engine: &str) -> Result<SqliteLocation, StoreError> {
    let engine = engine.trim();
    if engine.is_empty() {
        return Err(StoreError::config("sqlite engine string is empty"));
    }

    let path = match engine.split_once("://") {
        Some((scheme, rest)) => {
            // "sqlite+pysqlite" and friends name a driver, not a different store.
            if scheme != "sqlite" && !scheme.starts_with("sqlite+") {
                return Err(StoreError::config(format!(
                    "unsupported engine '{engine}': only sqlite:// URLs are supported"
                )));
            }
            match rest {
                "" | "/" => return Ok(SqliteLocation::Memory),
                _ => rest.strip_prefix('/').ok_or_else(|| {
                    StoreError::config(format!(
                        "engine '{engine}': sqlite URLs have no host, expected sqlite:///<path>"
                    ))
                })?,
            }
        }
        None => engine,
    };

    let path = path.split_once('?').map_or(path, |(p, _)| p);
    if path == ":memory:" {
        return Ok(SqliteLocation::Memory);
    }
    Ok(SqliteLocation::File(PathBuf::from(path)))
}
