//! Upsert outcomes and their aggregation into a run summary

use std::iter::Sum;
use std::ops::{Add, AddAssign};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which branch the store took for one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

impl UpsertOutcome {
    pub const fn from_inserted(inserted: bool) -> Self {
        if inserted { Self::Inserted } else { Self::Updated }
    }
}

/// Counts reported by one batch statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub inserted: u64,
    pub updated: u64,
    pub total: u64,
}

impl BatchResult {
    pub const fn new(inserted: u64, updated: u64) -> Self {
        Self {
            inserted,
            updated,
            total: inserted + updated,
        }
    }

    /// Count a stream of per-row outcomes.
    pub fn from_outcomes<I>(outcomes: I) -> Self
    where
        I: IntoIterator<Item = UpsertOutcome>,
    {
        outcomes
            .into_iter()
            .fold(Self::default(), |mut acc, outcome| {
                acc.record(outcome);
                acc
            })
    }

    pub fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated => self.updated += 1,
        }
        self.total += 1;
    }
}

impl Add for BatchResult {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            inserted: self.inserted + rhs.inserted,
            updated: self.updated + rhs.updated,
            total: self.total + rhs.total,
        }
    }
}

impl AddAssign for BatchResult {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for BatchResult {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

/// Diagnostics entry for one processed batch, in processing order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub index: usize,
    pub size: usize,
    pub result: BatchResult,
}

/// Final counters for one workflow invocation.
///
/// Built by [`ResultAggregator::finish`] and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    #[serde(rename = "runId")]
    pub run_id: Uuid,
    pub inserted: u64,
    pub updated: u64,
    pub total: u64,
    /// Feed rows dropped by validation
    pub skipped: u64,
    #[serde(rename = "startedAt")]
    pub started_at: DateTime<Utc>,
    #[serde(rename = "finishedAt")]
    pub finished_at: DateTime<Utc>,
    pub batches: Vec<BatchReport>,
}

impl SyncSummary {
    pub const fn counts(&self) -> BatchResult {
        BatchResult {
            inserted: self.inserted,
            updated: self.updated,
            total: self.total,
        }
    }
}

/// Folds per-batch results into a [`SyncSummary`].
#[derive(Debug, Clone)]
pub struct ResultAggregator {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    skipped: u64,
    totals: BatchResult,
    reports: Vec<BatchReport>,
}

impl ResultAggregator {
    pub fn new(run_id: Uuid, started_at: DateTime<Utc>, skipped: u64) -> Self {
        Self {
            run_id,
            started_at,
            skipped,
            totals: BatchResult::default(),
            reports: Vec::new(),
        }
    }

    pub fn push(&mut self, index: usize, size: usize, result: BatchResult) {
        self.totals += result;
        self.reports.push(BatchReport {
            index,
            size,
            result,
        });
    }

    /// Counts committed so far
    pub const fn totals(&self) -> BatchResult {
        self.totals
    }

    pub fn finish(self) -> SyncSummary {
        SyncSummary {
            run_id: self.run_id,
            inserted: self.totals.inserted,
            updated: self.totals.updated,
            total: self.totals.total,
            skipped: self.skipped,
            started_at: self.started_at,
            finished_at: Utc::now(),
            batches: self.reports,
        }
    }
}

/// Field-wise sum of batch results. Order does not matter.
pub fn aggregate<I>(results: I) -> BatchResult
where
    I: IntoIterator<Item = BatchResult>,
{
    results.into_iter().sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn outcomes_are_counted_per_branch() {
        let result = BatchResult::from_outcomes([
            UpsertOutcome::Inserted,
            UpsertOutcome::Updated,
            UpsertOutcome::Inserted,
        ]);
        assert_eq!(result, BatchResult::new(2, 1));
        assert_eq!(result.total, 3);
    }

    #[test]
    fn aggregator_keeps_processing_order() {
        let mut aggregator = ResultAggregator::new(Uuid::new_v4(), Utc::now(), 2);
        aggregator.push(0, 100, BatchResult::new(100, 0));
        aggregator.push(1, 100, BatchResult::new(40, 60));
        aggregator.push(2, 50, BatchResult::new(0, 50));

        let summary = aggregator.finish();
        assert_eq!(summary.counts(), BatchResult::new(140, 110));
        assert_eq!(summary.total, 250);
        assert_eq!(summary.skipped, 2);
        let order: Vec<usize> = summary.batches.iter().map(|b| b.index).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn empty_aggregation_is_zero() {
        assert_eq!(aggregate(Vec::new()), BatchResult::default());
    }

    proptest! {
        #[test]
        fn aggregation_is_order_independent(
            pairs in proptest::collection::vec((0u64..1_000, 0u64..1_000), 0..40)
        ) {
            let results: Vec<BatchResult> =
                pairs.iter().map(|&(i, u)| BatchResult::new(i, u)).collect();
            let mut reversed = results.clone();
            reversed.reverse();

            let forward = aggregate(results.clone());
            prop_assert_eq!(forward, aggregate(reversed));
            prop_assert_eq!(forward.total, forward.inserted + forward.updated);
        }
    }
}
