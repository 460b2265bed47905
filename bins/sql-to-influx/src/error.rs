use sync_api::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("source: {0}")]
    Source(StoreError),

    #[error("sink: {0}")]
    Sink(StoreError),

    #[error("{failed} of {total} tables failed")]
    PassFailed { failed: usize, total: usize },

    #[error("scheduler task: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}

impl AppError {
    pub(crate) fn config(context: &'static str, detail: impl Into<String>) -> Self {
        AppError::Config { context, detail: detail.into() }
    }
}
