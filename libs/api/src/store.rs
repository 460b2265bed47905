use std::future::Future;
use std::pin::Pin;

use crate::{Record, Recordset, StoreError, Timestamp};

// ════════════════════════════════════════════════════════════════
//  Store Traits
// ════════════════════════════════════════════════════════════════

/// Source: row-oriented хранилище, из которого данные забираются.
///
/// Реализации: SQLite (`storage-sqlite`), in-memory (`storage-memory`).
pub trait SourceReader: Send + Sync {
    /// Все строки `table` с timestamp >= `start` (все строки, если `start`
    /// не задан), отсортированные по timestamp по возрастанию.
    fn read<'a>(
        &'a self,
        table: &'a str,
        start: Option<Timestamp>,
    ) -> Pin<Box<dyn Future<Output = Result<Recordset, StoreError>> + Send + 'a>>;

    /// Удалить строки в замкнутом диапазоне `[start, end]`. Отсутствующая
    /// граница: диапазон не ограничен с этой стороны. Пустое совпадение
    /// не ошибка. Возвращает число удалённых строк.
    fn delete<'a>(
        &'a self,
        table: &'a str,
        start: Option<Timestamp>,
        end: Option<Timestamp>,
    ) -> Pin<Box<dyn Future<Output = Result<u64, StoreError>> + Send + 'a>>;
}

/// Destination: time-series хранилище, куда данные пишутся.
///
/// Реализации: InfluxDB (`storage-influx`), in-memory (`storage-memory`).
pub trait DestinationWriter: Send + Sync {
    /// Максимальный timestamp, сохранённый для `table`.
    /// `Ok(None)`: таблицы (measurement'а) ещё нет, это не ошибка.
    fn latest_timestamp<'a>(
        &'a self,
        table: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Timestamp>, StoreError>> + Send + 'a>>;

    /// Записать `records` батчами не больше `batch_size`.
    ///
    /// Ошибка любого батча: ошибка всего вызова; уже записанные батчи
    /// не откатываются.
    fn write<'a>(
        &'a self,
        table: &'a str,
        records: &'a [Record],
        tag_columns: &'a [String],
        batch_size: usize,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>>;
}
