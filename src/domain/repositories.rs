//! Boundary interfaces for the sync workflow
//!
//! The workflow only talks to the feed and the store through these traits.

use async_trait::async_trait;

use crate::domain::batch::Batch;
use crate::domain::record::RawFeed;
use crate::domain::sync_error::{FetchError, StoreError};
use crate::domain::sync_summary::BatchResult;

/// Source of raw product rows.
///
/// Fetching must be idempotent: with no change upstream, repeated calls
/// return the same rows.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self) -> Result<RawFeed, FetchError>;
}

/// Relational store that can insert-or-update a whole batch atomically.
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Write every record of `batch` in one statement keyed on `uuid`.
    ///
    /// Either all rows commit or none do. Re-submitting the same batch yields
    /// the same stored state and classifies every row as updated.
    async fn upsert_batch(&self, batch: &Batch) -> Result<BatchResult, StoreError>;

    /// Upper bound on records per batch imposed by the parameter ceiling
    fn max_batch_size(&self) -> usize;
}

#[async_trait]
impl<T: FeedSource + ?Sized> FeedSource for std::sync::Arc<T> {
    async fn fetch(&self) -> Result<RawFeed, FetchError> {
        (**self).fetch().await
    }
}

#[async_trait]
impl<T: ProductStore + ?Sized> ProductStore for std::sync::Arc<T> {
    async fn upsert_batch(&self, batch: &Batch) -> Result<BatchResult, StoreError> {
        (**self).upsert_batch(batch).await
    }

    fn max_batch_size(&self) -> usize {
        (**self).max_batch_size()
    }
}
