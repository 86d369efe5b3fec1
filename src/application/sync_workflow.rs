//! Sync workflow: fetch → validate → upsert
//!
//! A linear state machine around one reconciliation run. It performs no
//! retries of its own; every failure leaves with a [`FailureKind`] attached
//! and the scheduler decides what happens next.

use std::time::Instant;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::application::record_validator::RecordValidator;
use crate::domain::batch::{DEFAULT_BATCH_SIZE, effective_batch_size, partition};
use crate::domain::repositories::{FeedSource, ProductStore};
use crate::domain::sync_error::{FailureKind, SyncError};
use crate::domain::sync_summary::{ResultAggregator, SyncSummary};

/// Step the workflow is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Fetching,
    Validating,
    Upserting,
    Completed,
    Failed(FailureKind),
}

impl SyncState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }
}

/// Tunables for one workflow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Requested records per statement; clamped to the store's ceiling
    pub batch_size: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Outcome of a run together with the states it passed through.
#[derive(Debug)]
pub struct SyncRun {
    pub run_id: Uuid,
    pub states: Vec<SyncState>,
    pub result: Result<SyncSummary, SyncError>,
}

/// Ordered record of visited states, logged as they happen.
struct StateTrail {
    run_id: Uuid,
    states: Vec<SyncState>,
}

impl StateTrail {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            states: Vec::with_capacity(5),
        }
    }

    fn enter(&mut self, state: SyncState) {
        info!(run_id = %self.run_id, state = ?state, "Sync state transition");
        self.states.push(state);
    }

    fn fail(&mut self, error: SyncError) -> SyncError {
        let kind = error.kind();
        error!(run_id = %self.run_id, kind = %kind, "Sync failed: {}", error);
        self.enter(SyncState::Failed(kind));
        error
    }
}

/// One reconciliation run wired to an explicit feed and store.
pub struct SyncWorkflow<F, S> {
    feed: F,
    store: S,
    validator: RecordValidator,
    options: SyncOptions,
}

impl<F, S> SyncWorkflow<F, S>
where
    F: FeedSource,
    S: ProductStore,
{
    pub fn new(feed: F, store: S, validator: RecordValidator, options: SyncOptions) -> Self {
        Self {
            feed,
            store,
            validator,
            options,
        }
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Batch size actually used, after clamping to the store ceiling
    pub fn batch_size(&self) -> usize {
        effective_batch_size(self.options.batch_size, self.store.max_batch_size())
    }

    /// Run the workflow once and return the summary or a classified error.
    pub async fn run(&self) -> Result<SyncSummary, SyncError> {
        self.run_traced().await.result
    }

    /// Run the workflow once, keeping the visited states for diagnostics.
    pub async fn run_traced(&self) -> SyncRun {
        let run_id = Uuid::new_v4();
        let mut trail = StateTrail::new(run_id);
        let result = self.execute(run_id, &mut trail).await;
        SyncRun {
            run_id,
            states: trail.states,
            result,
        }
    }

    async fn execute(
        &self,
        run_id: Uuid,
        trail: &mut StateTrail,
    ) -> Result<SyncSummary, SyncError> {
        let started_at = Utc::now();
        let timer = Instant::now();

        trail.enter(SyncState::Fetching);
        let feed = match self.feed.fetch().await {
            Ok(feed) => feed,
            Err(e) => return Err(trail.fail(SyncError::from(e))),
        };
        info!(run_id = %run_id, rows = feed.rows.len(), "Fetched feed rows");

        trail.enter(SyncState::Validating);
        if let Some(header) = &feed.header {
            if let Err(e) = self.validator.layout().verify_header(header) {
                return Err(trail.fail(e));
            }
        }
        let report = self.validator.validate(&feed.rows);
        if report.skipped > 0 {
            warn!(run_id = %run_id, skipped = report.skipped, "Skipped invalid feed rows");
        }
        if report.records.is_empty() {
            info!(run_id = %run_id, "No products to sync");
            return Err(trail.fail(SyncError::EmptyFeed {
                skipped: report.skipped,
            }));
        }

        trail.enter(SyncState::Upserting);
        let batch_size = self.batch_size();
        let record_count = report.records.len();
        let batches = partition(report.records, batch_size);
        let batch_count = batches.len();
        info!(
            run_id = %run_id,
            records = record_count,
            batch_size,
            batch_count,
            "Starting batch upsert"
        );

        let mut aggregator = ResultAggregator::new(run_id, started_at, report.skipped);
        for (index, batch) in batches.iter().enumerate() {
            info!(
                run_id = %run_id,
                "Processing batch {}/{} ({} products)",
                index + 1,
                batch_count,
                batch.len()
            );

            match self.store.upsert_batch(batch).await {
                Ok(result) => aggregator.push(index, batch.len(), result),
                Err(source) => {
                    return Err(trail.fail(SyncError::BatchWrite {
                        batch_number: index + 1,
                        batch_count,
                        committed: aggregator.totals(),
                        source,
                    }));
                }
            }
        }

        let summary = aggregator.finish();
        trail.enter(SyncState::Completed);
        info!(
            run_id = %run_id,
            inserted = summary.inserted,
            updated = summary.updated,
            total = summary.total,
            skipped = summary.skipped,
            elapsed_ms = u64::try_from(timer.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Batch upsert completed"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::batch::Batch;
    use crate::domain::record::RawFeed;
    use crate::domain::sync_error::{FetchError, StoreError};
    use crate::domain::sync_summary::BatchResult;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FixedFeed(Result<RawFeed, FetchError>);

    #[async_trait]
    impl FeedSource for FixedFeed {
        async fn fetch(&self) -> Result<RawFeed, FetchError> {
            self.0.clone()
        }
    }

    /// Treats every record as new and can fail on a chosen batch.
    #[derive(Default)]
    struct RecordingStore {
        sizes: Mutex<Vec<usize>>,
        fail_on: Option<(usize, StoreError)>,
        max_batch: usize,
    }

    #[async_trait]
    impl ProductStore for RecordingStore {
        async fn upsert_batch(&self, batch: &Batch) -> Result<BatchResult, StoreError> {
            let mut sizes = self.sizes.lock().unwrap();
            if let Some((fail_at, error)) = &self.fail_on {
                if sizes.len() == *fail_at {
                    return Err(error.clone());
                }
            }
            sizes.push(batch.len());
            Ok(BatchResult::new(batch.len() as u64, 0))
        }

        fn max_batch_size(&self) -> usize {
            if self.max_batch == 0 { 4_680 } else { self.max_batch }
        }
    }

    fn rows(count: usize) -> Vec<Vec<String>> {
        (0..count)
            .map(|i| vec![format!("id-{i}"), format!("sku-{i}"), format!("name-{i}")])
            .collect()
    }

    fn workflow(
        feed: FixedFeed,
        store: RecordingStore,
        batch_size: usize,
    ) -> SyncWorkflow<FixedFeed, RecordingStore> {
        SyncWorkflow::new(feed, store, RecordValidator::default(), SyncOptions { batch_size })
    }

    #[tokio::test]
    async fn fetch_failure_is_retriable() {
        let feed = FixedFeed(Err(FetchError::Transport { message: "dns".into() }));
        let run = workflow(feed, RecordingStore::default(), 100).run_traced().await;

        assert!(matches!(run.result, Err(SyncError::Fetch(_))));
        assert_eq!(
            run.states,
            vec![SyncState::Fetching, SyncState::Failed(FailureKind::Retriable)]
        );
    }

    #[tokio::test]
    async fn empty_feed_fails_without_touching_store() {
        let feed = FixedFeed(Ok(RawFeed::from_rows(vec![vec![String::new(), "sku".into()]])));
        let wf = workflow(feed, RecordingStore::default(), 100);
        let run = wf.run_traced().await;

        match run.result {
            Err(SyncError::EmptyFeed { skipped }) => assert_eq!(skipped, 1),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(run.states.last(), Some(&SyncState::Failed(FailureKind::NonRetriable)));
        assert!(wf.store().sizes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn bad_header_fails_before_upsert() {
        let feed = FixedFeed(Ok(RawFeed::with_header(
            vec!["sku".into(), "uuid".into()],
            rows(3),
        )));
        let run = workflow(feed, RecordingStore::default(), 100).run_traced().await;

        assert!(matches!(run.result, Err(SyncError::LayoutMismatch { .. })));
        assert_eq!(
            run.states,
            vec![
                SyncState::Fetching,
                SyncState::Validating,
                SyncState::Failed(FailureKind::NonRetriable)
            ]
        );
    }

    #[tokio::test]
    async fn batches_run_in_order_and_sum() {
        let feed = FixedFeed(Ok(RawFeed::from_rows(rows(250))));
        let wf = workflow(feed, RecordingStore::default(), 100);
        let run = wf.run_traced().await;

        let summary = run.result.unwrap();
        assert_eq!(summary.counts(), BatchResult::new(250, 0));
        assert_eq!(*wf.store().sizes.lock().unwrap(), vec![100, 100, 50]);
        assert_eq!(
            run.states,
            vec![
                SyncState::Fetching,
                SyncState::Validating,
                SyncState::Upserting,
                SyncState::Completed
            ]
        );
        assert!(run.states.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn batch_size_is_clamped_to_store_ceiling() {
        let store = RecordingStore {
            max_batch: 40,
            ..RecordingStore::default()
        };
        let feed = FixedFeed(Ok(RawFeed::from_rows(rows(90))));
        let wf = workflow(feed, store, 100);

        assert_eq!(wf.batch_size(), 40);
        wf.run().await.unwrap();
        assert_eq!(*wf.store().sizes.lock().unwrap(), vec![40, 40, 10]);
    }

    #[tokio::test]
    async fn mid_run_failure_reports_no_partial_summary() {
        let store = RecordingStore {
            fail_on: Some((2, StoreError::retriable("connection reset"))),
            ..RecordingStore::default()
        };
        let feed = FixedFeed(Ok(RawFeed::from_rows(rows(500))));
        let result = workflow(feed, store, 100).run().await;

        match result {
            Err(SyncError::BatchWrite {
                batch_number,
                batch_count,
                committed,
                source,
            }) => {
                assert_eq!((batch_number, batch_count), (3, 5));
                assert_eq!(committed.total, 200);
                assert!(source.kind.is_retriable());
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn fatal_store_error_is_non_retriable() {
        let store = RecordingStore {
            fail_on: Some((0, StoreError::fatal("CHECK constraint failed"))),
            ..RecordingStore::default()
        };
        let feed = FixedFeed(Ok(RawFeed::from_rows(rows(5))));
        let run = workflow(feed, store, 100).run_traced().await;

        assert_eq!(run.result.unwrap_err().kind(), FailureKind::NonRetriable);
        assert_eq!(run.states.last(), Some(&SyncState::Failed(FailureKind::NonRetriable)));
    }
}
