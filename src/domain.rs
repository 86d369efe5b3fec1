//! Domain module - records, batches, outcomes and failure taxonomy
//!
//! Everything here is pure data and pure functions. I/O lives behind the
//! traits in [`repositories`].

pub mod batch;
pub mod record;
pub mod repositories;
pub mod sync_error;
pub mod sync_summary;

// Re-export commonly used items for convenience
pub use batch::{
    Batch, DEFAULT_BATCH_SIZE, effective_batch_size, max_batch_size_for, partition,
};
pub use record::{FIELDS_PER_RECORD, ProductRecord, RawFeed, RawRow, StoredProduct};
pub use repositories::{FeedSource, ProductStore};
pub use sync_error::{FailureKind, FetchError, StoreError, SyncError};
pub use sync_summary::{
    BatchReport, BatchResult, ResultAggregator, SyncSummary, UpsertOutcome, aggregate,
};
