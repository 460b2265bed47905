use serde::Deserialize;

use sync_api::{StoreError, Timestamp};

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct StatementResult {
    #[serde(default)]
    series: Vec<Series>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct Series {
    columns: Vec<String>,
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

/// Достать `time` первой строки ответа `/query?epoch=ns`.
///
/// Нет series: measurement ещё не существует, это `None`.
pub(crate) fn first_point_time(body: &str) -> Result<Option<Timestamp>, StoreError> {
    let resp: QueryResponse = serde_json::from_str(body)
        .map_err(|e| StoreError::format_err(format!("influx query response: {e}")))?;

    if let Some(err) = resp.error {
        return Err(StoreError::io(format!("influx query: {err}")));
    }

    let Some(result) = resp.results.into_iter().next() else {
        return Ok(None);
    };
    if let Some(err) = result.error {
        return Err(StoreError::io(format!("influx query: {err}")));
    }
    let Some(series) = result.series.into_iter().next() else {
        return Ok(None);
    };

    let time_idx = series
        .columns
        .iter()
        .position(|c| c == "time")
        .ok_or_else(|| StoreError::format_err("influx query response: no 'time' column"))?;
    let Some(row) = series.values.into_iter().next() else {
        return Ok(None);
    };

    let time = row
        .get(time_idx)
        .and_then(serde_json::Value::as_i64)
        .ok_or_else(|| {
            StoreError::format_err(format!(
                "influx query response: time is not an integer nanosecond value: {:?}",
                row.get(time_idx)
            ))
        })?;
    Ok(Some(Timestamp::from_nanos(time)))
}
