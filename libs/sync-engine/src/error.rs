use sync_api::StoreError;

/// Ошибка одного цикла синхронизации таблицы. Сторона (source/sink)
/// определяется по тому, какое хранилище вернуло ошибку.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("source ({table}): {source}")]
    Source { table: String, source: StoreError },

    #[error("sink ({table}): {source}")]
    Sink { table: String, source: StoreError },
}

impl SyncError {
    pub(crate) fn at_source(table: &str) -> impl FnOnce(StoreError) -> Self + '_ {
        move |source| SyncError::Source { table: table.to_string(), source }
    }

    pub(crate) fn at_sink(table: &str) -> impl FnOnce(StoreError) -> Self + '_ {
        move |source| SyncError::Sink { table: table.to_string(), source }
    }

    pub fn table(&self) -> &str {
        match self {
            SyncError::Source { table, .. } | SyncError::Sink { table, .. } => table,
        }
    }

    /// Inner store error, kind preserved.
    pub fn store_error(&self) -> &StoreError {
        match self {
            SyncError::Source { source, .. } | SyncError::Sink { source, .. } => source,
        }
    }

    pub fn is_source(&self) -> bool {
        matches!(self, SyncError::Source { .. })
    }
}
