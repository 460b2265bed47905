pub mod error;
mod scheduler;
mod synchronizer;

pub use error::SyncError;
pub use scheduler::{PassSummary, Scheduler};
pub use synchronizer::{
    CycleOutcome, CycleStats, DeleteBound, SyncSettings, Synchronizer, TableSpec,
    DEFAULT_BATCH_SIZE,
};
