use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use storage_sqlite::SqliteTableConfig;
use sync_api::TimeUnit;
use sync_engine::{DeleteBound, SyncSettings, TableSpec, DEFAULT_BATCH_SIZE};

use crate::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "sql-to-influx",
    about = "Переливает строки из SQLite в InfluxDB по watermark'у destination'а"
)]
pub struct Cli {
    /// Путь к JSON (или .toml) конфиг файлу
    #[arg(
        short = 'c',
        long = "config",
        aliases = ["configuration-file-path", "configuration_file_path"],
        env = "SQL_TO_INFLUX_CONFIG"
    )]
    pub config: PathBuf,

    /// Один проход по всем таблицам и выход
    #[arg(long)]
    pub once: bool,

    /// Писать в память вместо InfluxDB; source не очищается
    #[arg(long)]
    pub dry_run: bool,
}

// ---- Config file ----

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub sqlite: SqliteSection,
    pub influx: InfluxSection,
    pub synchronization: SyncSection,
}

#[derive(Debug, Deserialize)]
pub struct SqliteSection {
    /// Connection string: `sqlite:///path/to/db.sqlite`.
    pub engine: String,
    /// Таблицы в порядке обхода (по имени).
    pub tables: BTreeMap<String, TableConfig>,
}

/// Настройки одной таблицы. Опечатка в ключе: ошибка разбора, а не
/// молча применённое значение по умолчанию.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableConfig {
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default = "default_true")]
    pub delete_uploaded_data: bool,
    #[serde(default = "default_timestamp_column")]
    pub timestamp_column: String,
    #[serde(default)]
    pub timestamp_unit: TimeUnit,
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    #[serde(default, alias = "where")]
    pub where_condition: Option<String>,
}

impl TableConfig {
    /// Часть настроек, которую читает `storage-sqlite`.
    pub fn source(&self) -> SqliteTableConfig {
        SqliteTableConfig {
            timestamp_column: self.timestamp_column.clone(),
            timestamp_unit: self.timestamp_unit,
            columns: self.columns.clone(),
            where_condition: self.where_condition.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct InfluxSection {
    /// Параметры клиента как есть; разбирает `storage-influx`.
    pub client_data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct SyncSection {
    pub sleep_time_seconds: f64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub delete_bound: DeleteBound,
}

fn default_true() -> bool {
    true
}
fn default_timestamp_column() -> String {
    SqliteTableConfig::default().timestamp_column
}
fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::config("read", format!("'{}': {e}", path.display()))
        })?;
        let is_toml = path.extension().is_some_and(|ext| ext == "toml");
        let config = Self::parse(&content, is_toml)
            .map_err(|detail| AppError::config("parse", format!("'{}': {detail}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    fn parse(content: &str, is_toml: bool) -> Result<Self, String> {
        if is_toml {
            toml::from_str(content).map_err(|e| e.to_string())
        } else {
            serde_json::from_str(content).map_err(|e| e.to_string())
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.sqlite.engine.trim().is_empty() {
            return Err(AppError::config("sqlite", "engine must not be empty"));
        }
        if self.sqlite.tables.is_empty() {
            return Err(AppError::config("sqlite", "no tables configured"));
        }
        for (name, table) in &self.sqlite.tables {
            if name.trim().is_empty() {
                return Err(AppError::config("sqlite", "table name must not be empty"));
            }
            let ts_column = &table.timestamp_column;
            if ts_column.trim().is_empty() {
                return Err(AppError::config(
                    "sqlite",
                    format!("table '{name}': timestamp_column must not be empty"),
                ));
            }
            if table.tags.iter().flatten().any(|t| t == ts_column) {
                return Err(AppError::config(
                    "sqlite",
                    format!("table '{name}': timestamp column '{ts_column}' cannot be a tag"),
                ));
            }
        }

        let sync = &self.synchronization;
        self.interval()?;
        if sync.batch_size == 0 {
            return Err(AppError::config("synchronization", "batch_size must be at least 1"));
        }
        if !self.influx.client_data.is_object() {
            return Err(AppError::config("influx", "client_data must be an object"));
        }
        Ok(())
    }

    pub fn table_specs(&self) -> Vec<TableSpec> {
        self.sqlite
            .tables
            .iter()
            .map(|(name, table)| TableSpec {
                name: name.clone(),
                tags: table.tags.clone().unwrap_or_default(),
                delete_uploaded_data: table.delete_uploaded_data,
            })
            .collect()
    }

    pub fn source_tables(&self) -> HashMap<String, SqliteTableConfig> {
        self.sqlite
            .tables
            .iter()
            .map(|(name, table)| (name.clone(), table.source()))
            .collect()
    }

    pub fn settings(&self) -> SyncSettings {
        SyncSettings {
            batch_size: self.synchronization.batch_size,
            delete_bound: self.synchronization.delete_bound,
        }
    }

    /// Пауза между проходами.
    pub fn interval(&self) -> Result<Duration, AppError> {
        let secs = self.synchronization.sleep_time_seconds;
        Duration::try_from_secs_f64(secs).map_err(|e| {
            AppError::config(
                "synchronization",
                format!("sleep_time_seconds must be a non-negative number of seconds, got {secs}: {e}"),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "sqlite": {
            "engine": "sqlite:///test_db.db",
            "tables": {
                "weather": { "tags": ["station"], "timestamp_unit": "s" },
                "air": {
                    "tags": null,
                    "delete_uploaded_data": false,
                    "columns": ["pm25"],
                    "where": "pm25 IS NOT NULL"
                }
            }
        },
        "influx": { "client_data": { "database": "weather", "username": null } },
        "synchronization": { "sleep_time_seconds": 10 }
    }"#;

    fn sample() -> AppConfig {
        AppConfig::parse(SAMPLE, false).unwrap()
    }

    #[test]
    fn parses_json_with_defaults() {
        let config = sample();
        config.validate().unwrap();

        let specs = config.table_specs();
        let names: Vec<&str> = specs.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["air", "weather"]);
        assert!(specs[0].tags.is_empty());
        assert!(!specs[0].delete_uploaded_data);
        assert_eq!(specs[1].tags, vec!["station".to_string()]);
        assert!(specs[1].delete_uploaded_data);

        let settings = config.settings();
        assert_eq!(settings.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(settings.delete_bound, DeleteBound::Extracted);
        assert_eq!(config.interval().unwrap(), Duration::from_secs(10));

        let sources = config.source_tables();
        assert_eq!(sources["weather"].timestamp_unit, TimeUnit::Seconds);
        assert_eq!(sources["air"].timestamp_column, "timestamp");
        assert_eq!(sources["air"].columns, Some(vec!["pm25".to_string()]));
        assert_eq!(sources["air"].where_condition.as_deref(), Some("pm25 IS NOT NULL"));
        assert_eq!(sources["weather"].where_condition, None);
    }

    #[test]
    fn parses_toml() {
        let config = AppConfig::parse(
            r#"
            [sqlite]
            engine = "sqlite:///data.db"

            [sqlite.tables.weather]
            tags = ["station"]

            [influx.client_data]
            database = "weather"
            port = 8087

            [synchronization]
            sleep_time_seconds = 0.5
            batch_size = 100
            delete_bound = "confirmed"
            "#,
            true,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.settings().delete_bound, DeleteBound::Confirmed);
        assert_eq!(config.settings().batch_size, 100);
        assert_eq!(config.interval().unwrap(), Duration::from_millis(500));
        assert_eq!(config.influx.client_data["port"], 8087);
    }

    #[test]
    fn sleep_time_is_required() {
        let err = AppConfig::parse(
            r#"{"sqlite": {"engine": "x", "tables": {"t": {}}},
                "influx": {"client_data": {"database": "d"}},
                "synchronization": {}}"#,
            false,
        )
        .unwrap_err();
        assert!(err.contains("sleep_time_seconds"));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = sample();
        config.synchronization.batch_size = 0;
        assert!(matches!(
            config.validate(),
            Err(AppError::Config { context: "synchronization", .. })
        ));

        let mut config = sample();
        config.synchronization.sleep_time_seconds = -1.0;
        assert!(config.validate().is_err());

        let mut config = sample();
        config.synchronization.sleep_time_seconds = 1e20;
        assert!(matches!(
            config.validate(),
            Err(AppError::Config { context: "synchronization", .. })
        ));

        let mut config = sample();
        config.synchronization.sleep_time_seconds = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = sample();
        config.sqlite.tables.clear();
        assert!(config.validate().is_err());

        let mut config = sample();
        if let Some(weather) = config.sqlite.tables.get_mut("weather") {
            weather.tags = Some(vec!["timestamp".into()]);
        }
        assert!(config.validate().is_err());

        let mut config = sample();
        config.influx.client_data = serde_json::Value::Null;
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_timestamp_unit_is_a_parse_error() {
        let bad = SAMPLE.replace(r#""timestamp_unit": "s""#, r#""timestamp_unit": "weeks""#);
        assert!(AppConfig::parse(&bad, false).is_err());
    }

    #[test]
    fn misspelled_table_key_is_a_parse_error() {
        let bad = SAMPLE.replace("delete_uploaded_data", "delete_uploaded_dat");
        let err = AppConfig::parse(&bad, false).unwrap_err();
        assert!(err.contains("delete_uploaded_dat"));
    }

    #[test]
    fn config_flag_accepts_long_aliases() {
        for flag in ["--config", "--configuration-file-path", "--configuration_file_path"] {
            let cli = Cli::try_parse_from(["sql-to-influx", flag, "sync.json"]).unwrap();
            assert_eq!(cli.config, PathBuf::from("sync.json"));
        }
        let cli = Cli::try_parse_from(["sql-to-influx", "-c", "sync.toml", "--once"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("sync.toml"));
        assert!(cli.once);
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppConfig::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, AppError::Config { context: "read", .. }));

        let path = dir.path().join("config.json");
        std::fs::write(&path, SAMPLE).unwrap();
        assert_eq!(AppConfig::load(&path).unwrap().sqlite.tables.len(), 2);
    }
}
