//! Application layer module
//!
//! Validation, the sync workflow state machine, and the scheduler that drives
//! it on a cadence.

pub mod record_validator;
pub mod sync_scheduler;
pub mod sync_workflow;

pub use record_validator::{FeedLayout, RecordValidator, ValidationReport};
pub use sync_scheduler::{RetryPolicy, SyncJob, SyncScheduler, TickOutcome};
pub use sync_workflow::{SyncOptions, SyncRun, SyncState, SyncWorkflow};
