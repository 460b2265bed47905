//! Shared vocabulary of the synchronizer: data model, store traits and the
//! error type every store implementation returns.

mod error;
mod store;
mod types;
mod util;

pub use error::{ErrorKind, StoreError};
pub use store::{DestinationWriter, SourceReader};
pub use types::{batches, FieldValue, Record, Recordset, TimeUnit, Timestamp};
pub use util::{quote_sql_ident, strip_nulls};
