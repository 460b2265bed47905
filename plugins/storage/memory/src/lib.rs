use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;

use tokio::sync::{Mutex, RwLock};

use sync_api::{
    batches, DestinationWriter, FieldValue, Record, Recordset, SourceReader, StoreError, Timestamp,
};

// ═══════════════════════════════════════════════════════════════
//  MemorySource
// ═══════════════════════════════════════════════════════════════

/// Вызов, зарегистрированный MemorySource (для проверок в тестах).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceCall {
    Read { table: String, start: Option<Timestamp> },
    Delete { table: String, start: Option<Timestamp>, end: Option<Timestamp> },
}

/// In-memory source. Таблица = вектор записей; чтение и удаление
/// работают по тем же правилам диапазонов, что и SQLite reader.
#[derive(Default)]
pub struct MemorySource {
    tables: RwLock<HashMap<String, Vec<Record>>>,
    calls: Mutex<Vec<SourceCall>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Добавить строки в таблицу (таблица создаётся при первой вставке).
    pub async fn insert(&self, table: &str, records: impl IntoIterator<Item = Record>) {
        let mut tables = self.tables.write().await;
        tables.entry(table.to_string()).or_default().extend(records);
    }

    pub async fn rows(&self, table: &str) -> Vec<Record> {
        let tables = self.tables.read().await;
        let mut rows = tables.get(table).cloned().unwrap_or_default();
        rows.sort_by_key(|r| r.timestamp);
        rows
    }

    pub async fn len(&self, table: &str) -> usize {
        self.tables.read().await.get(table).map_or(0, Vec::len)
    }

    pub async fn calls(&self) -> Vec<SourceCall> {
        self.calls.lock().await.clone()
    }

    pub async fn delete_calls(&self) -> Vec<SourceCall> {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| matches!(c, SourceCall::Delete { .. }))
            .cloned()
            .collect()
    }
}

fn in_range(ts: Timestamp, start: Option<Timestamp>, end: Option<Timestamp>) -> bool {
    start.is_none_or(|s| ts >= s) && end.is_none_or(|e| ts <= e)
}

impl SourceReader for MemorySource {
    fn read<'a>(
        &'a self,
        table: &'a str,
        start: Option<Timestamp>,
    ) -> Pin<Box<dyn Future<Output = Result<Recordset, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.lock().await.push(SourceCall::Read { table: table.to_string(), start });

            let tables = self.tables.read().await;
            let rows = tables
                .get(table)
                .ok_or_else(|| StoreError::io(format!("no such table: {table}")))?;
            let selected: Vec<Record> = rows
                .iter()
                .filter(|r| in_range(r.timestamp, start, None))
                .cloned()
                .collect();
            Ok(Recordset::new(table, selected))
        })
    }

    fn delete<'a>(
        &'a self,
        table: &'a str,
        start: Option<Timestamp>,
        end: Option<Timestamp>,
    ) -> Pin<Box<dyn Future<Output = Result<u64, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.lock().await.push(SourceCall::Delete { table: table.to_string(), start, end });

            let mut tables = self.tables.write().await;
            let rows = tables
                .get_mut(table)
                .ok_or_else(|| StoreError::io(format!("no such table: {table}")))?;
            let before = rows.len();
            rows.retain(|r| !in_range(r.timestamp, start, end));
            Ok((before - rows.len()) as u64)
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryDestination
// ═══════════════════════════════════════════════════════════════

/// Точка, сохранённая в MemoryDestination.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPoint {
    pub timestamp: Timestamp,
    pub tags: BTreeMap<String, String>,
    pub fields: Vec<(String, FieldValue)>,
}

/// In-memory destination с семантикой time-series хранилища:
/// точка с тем же (timestamp, tags) перезаписывает предыдущую, поэтому
/// повторная запись того же диапазона идемпотентна.
#[derive(Default)]
pub struct MemoryDestination {
    measurements: RwLock<HashMap<String, Vec<StoredPoint>>>,
    batch_sizes: Mutex<Vec<usize>>,
    /// Some(n): после n успешных батчей каждый следующий батч падает.
    fail_after_batches: Mutex<Option<usize>>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Включить/выключить инъекцию ошибок записи.
    pub async fn fail_after_batches(&self, batches: Option<usize>) {
        *self.fail_after_batches.lock().await = batches;
    }

    pub async fn points(&self, table: &str) -> Vec<StoredPoint> {
        self.measurements.read().await.get(table).cloned().unwrap_or_default()
    }

    pub async fn len(&self, table: &str) -> usize {
        self.measurements.read().await.get(table).map_or(0, Vec::len)
    }

    /// Размеры всех батчей, принятых (или отвергнутых) с момента создания.
    pub async fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().await.clone()
    }

    fn to_point(record: &Record, tag_columns: &[String]) -> StoredPoint {
        let mut tags = BTreeMap::new();
        let mut fields = Vec::new();
        for (name, value) in &record.fields {
            if tag_columns.iter().any(|t| t == name) {
                if let Some(tag) = value.as_tag() {
                    tags.insert(name.clone(), tag);
                }
            } else if !value.is_null() {
                fields.push((name.clone(), value.clone()));
            }
        }
        StoredPoint { timestamp: record.timestamp, tags, fields }
    }
}

impl DestinationWriter for MemoryDestination {
    fn latest_timestamp<'a>(
        &'a self,
        table: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Timestamp>, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let measurements = self.measurements.read().await;
            Ok(measurements
                .get(table)
                .and_then(|points| points.iter().map(|p| p.timestamp).max()))
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
            let fail_after = *self.fail_after_batches.lock().await;
            for (i, batch) in batches(records, batch_size).enumerate() {
                self.batch_sizes.lock().await.push(batch.len());
                if fail_after.is_some_and(|n| i >= n) {
                    return Err(StoreError::io(format!(
                        "injected write failure on batch {i} of '{table}'"
                    )));
                }

                let mut measurements = self.measurements.write().await;
                let points = measurements.entry(table.to_string()).or_default();
                for record in batch {
                    let point = Self::to_point(record, tag_columns);
                    match points
                        .iter_mut()
                        .find(|p| p.timestamp == point.timestamp && p.tags == point.tags)
                    {
                        Some(existing) => *existing = point,
                        None => points.push(point),
                    }
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(ns: i64) -> Record {
        Record::new(Timestamp::from_nanos(ns)).with_field("value", ns as f64)
    }

    #[tokio::test]
    async fn source_read_is_inclusive_and_sorted() {
        let src = MemorySource::new();
        src.insert("t", [rec(30), rec(10), rec(20)]).await;

        let all = src.read("t", None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all.min_timestamp(), Some(Timestamp::from_nanos(10)));

        let tail = src.read("t", Some(Timestamp::from_nanos(20))).await.unwrap();
        assert_eq!(tail.len(), 2);
    }

    #[tokio::test]
    async fn source_delete_uses_closed_range() {
        let src = MemorySource::new();
        src.insert("t", [rec(10), rec(20), rec(30), rec(40)]).await;

        let deleted = src
            .delete("t", Some(Timestamp::from_nanos(20)), Some(Timestamp::from_nanos(30)))
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(src.len("t").await, 2);

        let none = src.delete("t", Some(Timestamp::from_nanos(100)), None).await.unwrap();
        assert_eq!(none, 0);
    }

    #[tokio::test]
    async fn source_unknown_table_is_an_error() {
        let src = MemorySource::new();
        assert!(src.read("missing", None).await.is_err());
    }

    #[tokio::test]
    async fn destination_overwrites_same_timestamp_and_tags() {
        let dst = MemoryDestination::new();
        let tags = vec!["station".to_string()];
        let a = Record::new(Timestamp::from_nanos(5)).with_field("station", "n").with_field("v", 1i64);
        let b = Record::new(Timestamp::from_nanos(5)).with_field("station", "n").with_field("v", 2i64);
        let c = Record::new(Timestamp::from_nanos(5)).with_field("station", "s").with_field("v", 3i64);

        dst.write("m", &[a, b, c], &tags, 10).await.unwrap();
        let points = dst.points("m").await;
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].fields, vec![("v".to_string(), FieldValue::Integer(2))]);
    }

    #[tokio::test]
    async fn destination_latest_is_none_for_unknown_measurement() {
        let dst = MemoryDestination::new();
        assert_eq!(dst.latest_timestamp("m").await.unwrap(), None);
    }

    #[tokio::test]
    async fn destination_failure_keeps_flushed_batches() {
        let dst = MemoryDestination::new();
        dst.fail_after_batches(Some(1)).await;
        let records: Vec<Record> = (0..5).map(rec).collect();

        assert!(dst.write("m", &records, &[], 2).await.is_err());
        assert_eq!(dst.len("m").await, 2);
        assert_eq!(dst.batch_sizes().await, vec![2, 2]);
    }
}
