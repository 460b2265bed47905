use std::collections::BTreeMap;

use serde::Deserialize;

use sync_api::{strip_nulls, StoreError};

/// Параметры подключения к InfluxDB (`influx.client_data`).
///
/// `null` в конфиге равносилен отсутствию ключа: такие записи удаляются
/// до разбора и вместо них берутся значения по умолчанию.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InfluxClientConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_credential")]
    pub username: String,
    #[serde(default = "default_credential")]
    pub password: String,
    pub database: String,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default)]
    pub verify_ssl: bool,
    /// Таймаут одного HTTP-запроса, секунды.
    #[serde(default)]
    pub timeout: Option<f64>,
    /// Дополнительные попытки запроса после транспортной ошибки.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Префикс URL (InfluxDB за reverse proxy).
    #[serde(default)]
    pub path: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default)]
    pub retention_policy: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_host() -> String {
    "localhost".into()
}
fn default_port() -> u16 {
    8086
}
fn default_credential() -> String {
    "root".into()
}
fn default_retries() -> u32 {
    3
}
fn default_pool_size() -> usize {
    10
}

impl InfluxClientConfig {
    /// Разобрать `client_data` из конфига приложения.
    pub fn from_client_data(client_data: serde_json::Value) -> Result<Self, StoreError> {
        let cfg: Self = serde_json::from_value(strip_nulls(client_data))
            .map_err(|e| StoreError::config(format!("influx client_data: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), StoreError> {
        if self.database.trim().is_empty() {
            return Err(StoreError::config("influx client_data: database must not be empty"));
        }
        if self.host.trim().is_empty() {
            return Err(StoreError::config("influx client_data: host must not be empty"));
        }
        if let Some(t) = self.timeout {
            if t <= 0.0 || std::time::Duration::try_from_secs_f64(t).is_err() {
                return Err(StoreError::config(format!(
                    "influx client_data: timeout must be a positive number of seconds, got {t}"
                )));
            }
        }
        Ok(())
    }

    /// `http[s]://host:port[/path]` без завершающего `/`.
    pub fn base_url(&self) -> String {
        let scheme = if self.ssl { "https" } else { "http" };
        let path = self.path.trim_matches('/');
        if path.is_empty() {
            format!("{scheme}://{}:{}", self.host, self.port)
        } else {
            format!("{scheme}://{}:{}/{path}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_fill_missing_and_null_keys() {
        let cfg = InfluxClientConfig::from_client_data(json!({
            "database": "weather",
            "username": null,
            "port": null,
        }))
        .unwrap();
        assert_eq!(cfg.host, "localhost");
        assert_eq!(cfg.port, 8086);
        assert_eq!(cfg.username, "root");
        assert_eq!(cfg.password, "root");
        assert_eq!(cfg.retries, 3);
        assert_eq!(cfg.pool_size, 10);
        assert!(!cfg.ssl);
        assert_eq!(cfg.base_url(), "http://localhost:8086");
    }

    #[test]
    fn database_is_required() {
        let err = InfluxClientConfig::from_client_data(json!({ "host": "db" })).unwrap_err();
        assert_eq!(err.kind(), sync_api::ErrorKind::Config);
        assert!(err.message().contains("database"));

        let err = InfluxClientConfig::from_client_data(json!({ "database": " " })).unwrap_err();
        assert_eq!(err.kind(), sync_api::ErrorKind::Config);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = InfluxClientConfig::from_client_data(json!({
            "database": "weather",
            "use_udp": true,
        }))
        .unwrap_err();
        assert!(err.message().contains("use_udp"));
    }

    #[test]
    fn timeout_must_be_positive() {
        assert!(
            InfluxClientConfig::from_client_data(json!({ "database": "d", "timeout": 0 })).is_err()
        );
        let cfg =
            InfluxClientConfig::from_client_data(json!({ "database": "d", "timeout": 2.5 })).unwrap();
        assert_eq!(cfg.timeout, Some(2.5));

        let err = InfluxClientConfig::from_client_data(json!({ "database": "d", "timeout": 1e20 }))
            .unwrap_err();
        assert!(err.message().contains("timeout"));
    }

    #[test]
    fn base_url_with_ssl_and_path() {
        let cfg = InfluxClientConfig::from_client_data(json!({
            "database": "d",
            "host": "influx.local",
            "port": 443,
            "ssl": true,
            "path": "/influx/",
        }))
        .unwrap();
        assert_eq!(cfg.base_url(), "https://influx.local:443/influx");
    }
}
