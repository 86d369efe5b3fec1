//! Failure taxonomy for a sync run
//!
//! Every failure the workflow can raise carries an explicit [`FailureKind`] so
//! the scheduler decides whether to re-run without inspecting error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::sync_summary::BatchResult;

/// Whether the scheduler should attempt the whole workflow again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    Retriable,
    NonRetriable,
}

impl FailureKind {
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Retriable)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Retriable => write!(f, "retriable"),
            Self::NonRetriable => write!(f, "non-retriable"),
        }
    }
}

/// The feed could not be read. Always retriable.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    #[error("Feed request failed: {message}")]
    Transport { message: String },

    #[error("Feed responded with HTTP {status}: {message}")]
    Status {
        status: u16,
        message: String,
    },

    #[error("Feed response could not be decoded: {message}")]
    Malformed { message: String },
}

/// A batch statement failed inside the store.
#[derive(Error, Debug, Clone)]
#[error("{kind} store error: {message}")]
pub struct StoreError {
    pub kind: FailureKind,
    pub message: String,
}

impl StoreError {
    pub fn retriable(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Retriable,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::NonRetriable,
            message: message.into(),
        }
    }
}

/// Terminal outcome of a failed workflow run.
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    #[error("Failed to fetch feed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Feed produced no valid records ({skipped} rows skipped)")]
    EmptyFeed { skipped: u64 },

    #[error("Feed layout mismatch: {message}")]
    LayoutMismatch { message: String },

    #[error("Batch {batch_number}/{batch_count} failed: {source}")]
    BatchWrite {
        /// 1-based position of the failing batch
        batch_number: usize,
        batch_count: usize,
        /// Counts already committed by earlier batches; diagnostics only
        committed: BatchResult,
        #[source]
        source: StoreError,
    },
}

impl SyncError {
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Fetch(_) => FailureKind::Retriable,
            Self::EmptyFeed { .. } | Self::LayoutMismatch { .. } => FailureKind::NonRetriable,
            Self::BatchWrite { source, .. } => source.kind,
        }
    }

    pub const fn is_retriable(&self) -> bool {
        self.kind().is_retriable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_failures_are_retriable() {
        let error = SyncError::from(FetchError::Transport {
            message: "connection reset".into(),
        });
        assert_eq!(error.kind(), FailureKind::Retriable);
    }

    #[test]
    fn empty_feed_is_terminal() {
        let error = SyncError::EmptyFeed { skipped: 4 };
        assert!(!error.is_retriable());
        assert_eq!(
            error.to_string(),
            "Feed produced no valid records (4 rows skipped)"
        );
    }

    #[test]
    fn batch_write_inherits_store_classification() {
        let transient = SyncError::BatchWrite {
            batch_number: 3,
            batch_count: 5,
            committed: BatchResult::new(150, 50),
            source: StoreError::retriable("pool timed out"),
        };
        assert!(transient.is_retriable());

        let fatal = SyncError::BatchWrite {
            batch_number: 1,
            batch_count: 1,
            committed: BatchResult::default(),
            source: StoreError::fatal("CHECK constraint failed"),
        };
        assert_eq!(fatal.kind(), FailureKind::NonRetriable);
        assert!(fatal.to_string().starts_with("Batch 1/1 failed"));
    }
}
