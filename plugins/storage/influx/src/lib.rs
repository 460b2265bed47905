//! InfluxDB 1.x [`DestinationWriter`] over the HTTP API.

mod config;
mod line_protocol;
mod response;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{RequestBuilder, Response, StatusCode};

use sync_api::{batches, DestinationWriter, Record, StoreError, Timestamp};

pub use config::InfluxClientConfig;

/// Пауза перед первой повторной попыткой, дальше удваивается.
const RETRY_BACKOFF: Duration = Duration::from_millis(50);
const RETRY_BACKOFF_MAX: Duration = Duration::from_secs(30);

fn retry_backoff(attempt: u32) -> Duration {
    RETRY_BACKOFF
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(RETRY_BACKOFF_MAX)
}

/// Идентификатор InfluxQL в двойных кавычках.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
}

/// InfluxDB destination.
///
/// Один `reqwest::Client` (пул соединений) на всё время жизни процесса.
/// Measurement = имя таблицы source'а.
pub struct InfluxWriter {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    database: String,
    retention_policy: Option<String>,
    retries: u32,
}

impl InfluxWriter {
    pub fn new(cfg: InfluxClientConfig) -> Result<Self, StoreError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &cfg.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| StoreError::config(format!("influx header '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| StoreError::config(format!("influx header '{name}': {e}")))?;
            headers.insert(name, value);
        }

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .pool_max_idle_per_host(cfg.pool_size)
            .danger_accept_invalid_certs(cfg.ssl && !cfg.verify_ssl);
        if let Some(secs) = cfg.timeout {
            let timeout = Duration::try_from_secs_f64(secs)
                .map_err(|e| StoreError::config(format!("influx timeout {secs}: {e}")))?;
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| StoreError::config(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: cfg.base_url(),
            username: cfg.username,
            password: cfg.password,
            database: cfg.database,
            retention_policy: cfg.retention_policy,
            retries: cfg.retries,
        })
    }

    /// Собрать writer из `influx.client_data` конфига.
    pub fn from_client_data(client_data: serde_json::Value) -> Result<Self, StoreError> {
        Self::new(InfluxClientConfig::from_client_data(client_data)?)
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// `GET /ping`: сервер доступен и отвечает.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let req = self.http.get(format!("{}/ping", self.base_url));
        let resp = self.send(req).await?;
        Self::check_status(resp, "ping").await?;
        tracing::debug!(url = %self.base_url, "influx ping ok");
        Ok(())
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.basic_auth(&self.username, Some(&self.password))
    }

    /// Отправить запрос, повторяя его после транспортных ошибок.
    /// HTTP-ответ с любым статусом: не транспортная ошибка.
    async fn send(&self, req: RequestBuilder) -> Result<Response, StoreError> {
        let mut attempt = 0u32;
        loop {
            let this_try = req
                .try_clone()
                .ok_or_else(|| StoreError::new("influx request body is not cloneable"))?;
            match this_try.send().await {
                Ok(resp) => return Ok(resp),
                Err(e) if attempt < self.retries => {
                    let backoff = retry_backoff(attempt);
                    attempt += 1;
                    tracing::warn!(
                        error = %e,
                        attempt,
                        retries = self.retries,
                        "influx request failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(StoreError::io(format!("influx request: {e}"))),
            }
        }
    }

    async fn check_status(resp: Response, what: &str) -> Result<String, StoreError> {
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| StoreError::io(format!("influx {what} read: {e}")))?;
        if status.is_success() {
            Ok(body)
        } else if status == StatusCode::BAD_REQUEST {
            // 400 на /write: точки не распарсились или конфликт типов поля.
            Err(StoreError::format_err(format!("influx {what} {status}: {}", body.trim())))
        } else {
            Err(StoreError::io(format!("influx {what} {status}: {}", body.trim())))
        }
    }

    async fn query_latest(&self, measurement: &str) -> Result<Option<Timestamp>, StoreError> {
        let q = format!("SELECT * FROM {} ORDER BY time DESC LIMIT 1", self.from_target(measurement));
        let req = self
            .authed(self.http.get(format!("{}/query", self.base_url)))
            .query(&[("db", self.database.as_str()), ("epoch", "ns"), ("q", q.as_str())]);
        let resp = self.send(req).await?;
        let body = Self::check_status(resp, "query").await?;
        response::first_point_time(&body)
    }

    /// Measurement в той же retention policy, куда пишет `/write`.
    fn from_target(&self, measurement: &str) -> String {
        match &self.retention_policy {
            Some(rp) => format!("{}.{}", quote_ident(rp), quote_ident(measurement)),
            None => quote_ident(measurement),
        }
    }

    async fn write_batch(&self, body: String) -> Result<(), StoreError> {
        let mut params = vec![("db", self.database.as_str()), ("precision", "ns")];
        if let Some(rp) = &self.retention_policy {
            params.push(("rp", rp.as_str()));
        }
        let req = self
            .authed(self.http.post(format!("{}/write", self.base_url)))
            .query(&params)
            .body(body);
        let resp = self.send(req).await?;
        Self::check_status(resp, "write").await?;
        Ok(())
    }
}

impl DestinationWriter for InfluxWriter {
    fn latest_timestamp<'a>(
        &'a self,
        table: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Timestamp>, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let latest = self.query_latest(table).await?;
            if latest.is_none() {
                tracing::info!(measurement = table, "measurement has no points yet");
            }
            Ok(latest)
        })
    }

    fn write<'a>(
        &'a self,
        table: &'a str,
        records: &'a [Record],
        tag_columns: &'a [String],
        batch_size: usize,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move {
            for (i, batch) in batches(records, batch_size).enumerate() {
                let body = line_protocol::encode_batch(table, batch, tag_columns)?;
                self.write_batch(body).await?;
                tracing::debug!(measurement = table, batch = i, points = batch.len(), "influx batch written");
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn writer(extra: serde_json::Value) -> InfluxWriter {
        let mut client_data = json!({ "database": "weather" });
        if let (Some(base), Some(extra)) = (client_data.as_object_mut(), extra.as_object()) {
            base.extend(extra.clone());
        }
        InfluxWriter::from_client_data(client_data).unwrap()
    }

    #[test]
    fn query_target_follows_retention_policy() {
        assert_eq!(writer(json!({})).from_target("weather"), r#""weather""#);
        assert_eq!(
            writer(json!({ "retention_policy": "one_week" })).from_target("weather"),
            r#""one_week"."weather""#
        );
        assert_eq!(quote_ident(r#"a"b\c"#), r#""a\"b\\c""#);
    }

    #[test]
    fn backoff_doubles_and_is_capped() {
        assert_eq!(retry_backoff(0), Duration::from_millis(50));
        assert_eq!(retry_backoff(1), Duration::from_millis(100));
        assert_eq!(retry_backoff(3), Duration::from_millis(400));
        assert_eq!(retry_backoff(25), RETRY_BACKOFF_MAX);
        assert_eq!(retry_backoff(u32::MAX), RETRY_BACKOFF_MAX);
    }

    #[test]
    fn huge_timeout_is_a_config_error() {
        let cfg = InfluxClientConfig::from_client_data(json!({ "database": "weather" })).unwrap();
        let cfg = InfluxClientConfig { timeout: Some(1e20), ..cfg };
        let err = match InfluxWriter::new(cfg) {
            Ok(_) => panic!("timeout out of range must be rejected"),
            Err(e) => e,
        };
        assert_eq!(err.kind(), sync_api::ErrorKind::Config);
    }
}
