use std::sync::Arc;

use serde::Deserialize;

use sync_api::{DestinationWriter, SourceReader, Timestamp};

use crate::SyncError;

/// Размер батча записи в destination по умолчанию.
pub const DEFAULT_BATCH_SIZE: usize = 5000;

// ═══════════════════════════════════════════════════════════════
//  Settings
// ═══════════════════════════════════════════════════════════════

/// Верхняя граница диапазона удаления из source после записи.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteBound {
    /// Watermark destination'а, перечитанный после записи.
    Confirmed,
    /// min(watermark после записи, максимальный извлечённый timestamp):
    /// строки, которых не было в извлечённом наборе, не удаляются даже
    /// если destination сообщает более поздний watermark.
    #[default]
    Extracted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub batch_size: usize,
    pub delete_bound: DeleteBound,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            delete_bound: DeleteBound::default(),
        }
    }
}

/// Таблица, участвующая в синхронизации.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    /// Имя таблицы в source и measurement'а в destination.
    pub name: String,
    /// Колонки, записываемые в destination как tags.
    pub tags: Vec<String>,
    /// Удалять ли из source строки, подтверждённые в destination.
    pub delete_uploaded_data: bool,
}

impl TableSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: Vec::new(),
            delete_uploaded_data: true,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn keep_source(mut self) -> Self {
        self.delete_uploaded_data = false;
        self
    }
}

// ═══════════════════════════════════════════════════════════════
//  Cycle outcome
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleStats {
    pub rows_written: usize,
    /// Watermark до чтения (нижняя граница чтения и удаления).
    pub start: Option<Timestamp>,
    /// Верхняя граница удаления. None: удаление не выполнялось.
    pub end: Option<Timestamp>,
    /// Число удалённых из source строк. None: удаление не выполнялось.
    pub deleted: Option<u64>,
}

/// Результат одного цикла для одной таблицы.
#[derive(Debug)]
pub enum CycleOutcome {
    /// Новых строк нет: ни записи, ни удаления.
    Idle,
    Synced(CycleStats),
    Failed(SyncError),
}

impl CycleOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, CycleOutcome::Failed(_))
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, CycleOutcome::Idle)
    }

    pub fn stats(&self) -> Option<&CycleStats> {
        match self {
            CycleOutcome::Synced(stats) => Some(stats),
            _ => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Synchronizer
// ═══════════════════════════════════════════════════════════════

/// Перенос новых строк одной таблицы из source в destination.
///
/// Состояния между циклами нет: watermark каждый раз выводится из
/// destination заново. Порядок шагов цикла:
///
/// 1. `start` = watermark destination'а (None: destination пуст).
/// 2. Чтение строк source с timestamp >= `start`. Пусто: конец цикла.
/// 3. Запись в destination батчами.
/// 4. Повторное чтение watermark'а: граница того, что реально записано.
/// 5. Удаление `[start, end]` из source (если включено).
///
/// Ошибка на любом шаге логируется и возвращается как
/// [`CycleOutcome::Failed`]; source при этом не трогается, следующий
/// цикл начнёт с того же watermark'а.
pub struct Synchronizer {
    reader: Arc<dyn SourceReader>,
    writer: Arc<dyn DestinationWriter>,
    settings: SyncSettings,
}

impl Synchronizer {
    pub fn new(
        reader: Arc<dyn SourceReader>,
        writer: Arc<dyn DestinationWriter>,
        settings: SyncSettings,
    ) -> Self {
        Self { reader, writer, settings }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Выполнить один цикл для таблицы. Никогда не паникует и не
    /// пробрасывает ошибку: все сбои в `CycleOutcome::Failed`.
    pub async fn run_cycle(&self, table: &TableSpec) -> CycleOutcome {
        match self.try_cycle(table).await {
            Ok(None) => {
                tracing::debug!(table = %table.name, "no new rows");
                CycleOutcome::Idle
            }
            Ok(Some(stats)) => {
                tracing::info!(
                    table = %table.name,
                    rows = stats.rows_written,
                    start = ?stats.start.map(Timestamp::as_nanos),
                    end = ?stats.end.map(Timestamp::as_nanos),
                    deleted = ?stats.deleted,
                    "table synchronized"
                );
                CycleOutcome::Synced(stats)
            }
            Err(e) => {
                tracing::error!(
                    table = %table.name,
                    kind = %e.store_error().kind(),
                    error = %e,
                    "sync cycle failed"
                );
                CycleOutcome::Failed(e)
            }
        }
    }

    async fn try_cycle(&self, table: &TableSpec) -> Result<Option<CycleStats>, SyncError> {
        let name = table.name.as_str();

        // 1. Resolve watermark
        let start = self
            .writer
            .latest_timestamp(name)
            .await
            .map_err(SyncError::at_sink(name))?;
        if start.is_none() {
            tracing::info!(table = %name, "destination has no data yet, extracting full table");
        }

        // 2. Extract
        let rows = self
            .reader
            .read(name, start)
            .await
            .map_err(SyncError::at_source(name))?;
        if rows.is_empty() {
            return Ok(None);
        }
        let extracted_max = rows.max_timestamp();
        tracing::debug!(table = %name, rows = rows.len(), "extracted rows");

        // 3. Load
        self.writer
            .write(name, rows.records(), &table.tags, self.settings.batch_size)
            .await
            .map_err(SyncError::at_sink(name))?;

        let mut stats = CycleStats {
            rows_written: rows.len(),
            start,
            end: None,
            deleted: None,
        };
        if !table.delete_uploaded_data {
            return Ok(Some(stats));
        }

        // 4. Re-resolve watermark
        let confirmed = self
            .writer
            .latest_timestamp(name)
            .await
            .map_err(SyncError::at_sink(name))?;
        let Some(end) = self.delete_bound(confirmed, extracted_max) else {
            tracing::warn!(
                table = %name,
                rows = rows.len(),
                "destination reports no data after a successful write, skipping purge"
            );
            return Ok(Some(stats));
        };

        // 5. Purge
        let deleted = self
            .reader
            .delete(name, start, Some(end))
            .await
            .map_err(SyncError::at_source(name))?;
        stats.end = Some(end);
        stats.deleted = Some(deleted);
        Ok(Some(stats))
    }

    fn delete_bound(
        &self,
        confirmed: Option<Timestamp>,
        extracted_max: Option<Timestamp>,
    ) -> Option<Timestamp> {
        let confirmed = confirmed?;
        match self.settings.delete_bound {
            DeleteBound::Confirmed => Some(confirmed),
            DeleteBound::Extracted => {
                Some(extracted_max.map_or(confirmed, |max| confirmed.min(max)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sync_with(bound: DeleteBound) -> Synchronizer {
        Synchronizer::new(
            Arc::new(storage_memory::MemorySource::new()),
            Arc::new(storage_memory::MemoryDestination::new()),
            SyncSettings { batch_size: 10, delete_bound: bound },
        )
    }

    fn ts(ns: i64) -> Option<Timestamp> {
        Some(Timestamp::from_nanos(ns))
    }

    #[test]
    fn confirmed_bound_follows_destination() {
        let s = sync_with(DeleteBound::Confirmed);
        assert_eq!(s.delete_bound(ts(50), ts(30)), ts(50));
        assert_eq!(s.delete_bound(ts(20), ts(30)), ts(20));
        assert_eq!(s.delete_bound(None, ts(30)), None);
    }

    #[test]
    fn extracted_bound_never_exceeds_extracted_rows() {
        let s = sync_with(DeleteBound::Extracted);
        assert_eq!(s.delete_bound(ts(50), ts(30)), ts(30));
        assert_eq!(s.delete_bound(ts(20), ts(30)), ts(20));
        assert_eq!(s.delete_bound(None, ts(30)), None);
    }

    #[test]
    fn table_spec_defaults() {
        let spec = TableSpec::new("weather");
        assert!(spec.tags.is_empty());
        assert!(spec.delete_uploaded_data);
        let spec = spec.with_tags(["station"]).keep_source();
        assert_eq!(spec.tags, vec!["station".to_string()]);
        assert!(!spec.delete_uploaded_data);
    }

    #[test]
    fn delete_bound_parses_from_config_names() {
        let b: DeleteBound = serde_json::from_str("\"confirmed\"").unwrap();
        assert_eq!(b, DeleteBound::Confirmed);
        assert_eq!(SyncSettings::default().batch_size, 5000);
        assert_eq!(SyncSettings::default().delete_bound, DeleteBound::Extracted);
    }
}
