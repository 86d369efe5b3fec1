//! Batch partitioning
//!
//! Splits the validated record sequence into ordered, bounded chunks so each
//! upsert statement stays under the store's bound-parameter ceiling.

use crate::domain::record::{FIELDS_PER_RECORD, ProductRecord};

/// Default number of records per upsert statement
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Ordered, non-empty group of records written by one statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    records: Vec<ProductRecord>,
}

impl Batch {
    /// Returns `None` for an empty record list.
    pub fn new(records: Vec<ProductRecord>) -> Option<Self> {
        if records.is_empty() {
            None
        } else {
            Some(Self { records })
        }
    }

    pub fn records(&self) -> &[ProductRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Always false for a constructed batch.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<ProductRecord> {
        self.records
    }
}

/// Largest batch that keeps `len * FIELDS_PER_RECORD` within `param_limit`.
pub fn max_batch_size_for(param_limit: usize) -> usize {
    (param_limit / FIELDS_PER_RECORD).max(1)
}

/// Clamp a configured batch size into `1..=max_batch_size`.
pub fn effective_batch_size(requested: usize, max_batch_size: usize) -> usize {
    requested.clamp(1, max_batch_size.max(1))
}

/// Partition `records` into batches of at most `batch_size` records.
///
/// Order is preserved and nothing is dropped or duplicated; only the last
/// batch may be shorter. An empty input yields no batches.
pub fn partition(records: Vec<ProductRecord>, batch_size: usize) -> Vec<Batch> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::with_capacity(records.len().div_ceil(batch_size));
    let mut iter = records.into_iter().peekable();

    while iter.peek().is_some() {
        let chunk: Vec<ProductRecord> = iter.by_ref().take(batch_size).collect();
        if let Some(batch) = Batch::new(chunk) {
            batches.push(batch);
        }
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn records(count: usize) -> Vec<ProductRecord> {
        (0..count)
            .map(|i| ProductRecord::new(format!("uuid-{i}")))
            .collect()
    }

    #[test]
    fn empty_input_yields_no_batches() {
        assert!(partition(Vec::new(), 100).is_empty());
    }

    #[test]
    fn batch_rejects_empty_records() {
        assert!(Batch::new(Vec::new()).is_none());
    }

    #[test]
    fn two_hundred_fifty_records_split_into_three_batches() {
        let batches = partition(records(250), 100);
        let sizes: Vec<usize> = batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
    }

    #[test]
    fn exact_multiple_has_no_short_tail() {
        let batches = partition(records(200), 100);
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.len() == 100));
    }

    #[test]
    fn zero_batch_size_is_treated_as_one() {
        let batches = partition(records(3), 0);
        assert_eq!(batches.len(), 3);
    }

    #[test]
    fn max_batch_size_respects_parameter_ceiling() {
        assert_eq!(max_batch_size_for(999), 142);
        assert_eq!(max_batch_size_for(32_766), 4_680);
        assert_eq!(max_batch_size_for(65_535), 9_362);
        assert_eq!(max_batch_size_for(3), 1);
    }

    #[test]
    fn effective_batch_size_clamps_both_ends() {
        assert_eq!(effective_batch_size(0, 142), 1);
        assert_eq!(effective_batch_size(100, 142), 100);
        assert_eq!(effective_batch_size(500, 142), 142);
    }

    proptest! {
        #[test]
        fn batches_concatenate_back_to_input(count in 0usize..600, batch_size in 1usize..150) {
            let input = records(count);
            let batches = partition(input.clone(), batch_size);

            prop_assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= batch_size));

            let rebuilt: Vec<ProductRecord> = batches
                .into_iter()
                .flat_map(Batch::into_records)
                .collect();
            prop_assert_eq!(rebuilt, input);
        }
    }
}
