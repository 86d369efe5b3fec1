//! Record validation
//!
//! Decodes positional feed rows into [`ProductRecord`]s through an explicit,
//! versioned column mapping. Field-level problems never fail a run: numbers
//! fall back to 0 and rows without a `uuid` are dropped and counted.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::domain::record::{ProductRecord, RawRow};
use crate::domain::sync_error::SyncError;

/// Sentinel value marking a product as ready for sale
pub const READY_SENTINEL: &str = "Y";

/// Named field a feed column decodes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedField {
    Uuid,
    Sku,
    Name,
    ReadyForSale,
    StockCount,
    Price,
    ShortDesc,
}

/// Column position and header label of one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub field: FeedField,
    pub index: usize,
    pub label: &'static str,
}

/// Versioned column mapping for the product sheet.
///
/// Every column offset the decoder reads comes from this table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedLayout {
    pub version: u32,
    columns: Vec<ColumnSpec>,
}

impl FeedLayout {
    /// Current sheet layout: uuid, sku, name, ready, stock, price, description
    pub fn v1() -> Self {
        Self {
            version: 1,
            columns: vec![
                ColumnSpec {
                    field: FeedField::Uuid,
                    index: 0,
                    label: "uuid",
                },
                ColumnSpec {
                    field: FeedField::Sku,
                    index: 1,
                    label: "sku",
                },
                ColumnSpec {
                    field: FeedField::Name,
                    index: 2,
                    label: "name",
                },
                ColumnSpec {
                    field: FeedField::ReadyForSale,
                    index: 3,
                    label: "ready_for_sale",
                },
                ColumnSpec {
                    field: FeedField::StockCount,
                    index: 4,
                    label: "stock_count",
                },
                ColumnSpec {
                    field: FeedField::Price,
                    index: 5,
                    label: "price",
                },
                ColumnSpec {
                    field: FeedField::ShortDesc,
                    index: 6,
                    label: "short_desc",
                },
            ],
        }
    }

    /// Look up a layout by version number
    pub fn by_version(version: u32) -> Option<Self> {
        match version {
            1 => Some(Self::v1()),
            _ => None,
        }
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// Number of columns a complete row spans
    pub fn width(&self) -> usize {
        self.columns.iter().map(|c| c.index + 1).max().unwrap_or(0)
    }

    fn index_of(&self, field: FeedField) -> Option<usize> {
        self.columns
            .iter()
            .find(|c| c.field == field)
            .map(|c| c.index)
    }

    /// Check a header row against the expected labels.
    ///
    /// Labels compare trimmed and case-insensitively, with spaces and dashes
    /// treated as underscores.
    pub fn verify_header(&self, header: &[String]) -> Result<(), SyncError> {
        if header.len() < self.width() {
            return Err(SyncError::LayoutMismatch {
                message: format!(
                    "layout v{} expects {} columns, header has {}",
                    self.version,
                    self.width(),
                    header.len()
                ),
            });
        }

        for column in &self.columns {
            let found = normalize_label(&header[column.index]);
            if found != column.label {
                return Err(SyncError::LayoutMismatch {
                    message: format!(
                        "layout v{} expects '{}' in column {}, found '{}'",
                        self.version,
                        column.label,
                        column.index,
                        header[column.index].trim()
                    ),
                });
            }
        }

        Ok(())
    }
}

impl Default for FeedLayout {
    fn default() -> Self {
        Self::v1()
    }
}

fn normalize_label(label: &str) -> String {
    label
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

/// Records that survived validation plus how many rows were dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub records: Vec<ProductRecord>,
    pub skipped: u64,
}

/// Turns raw feed rows into records according to a [`FeedLayout`].
#[derive(Debug, Clone, Default)]
pub struct RecordValidator {
    layout: FeedLayout,
}

impl RecordValidator {
    pub const fn new(layout: FeedLayout) -> Self {
        Self { layout }
    }

    pub const fn layout(&self) -> &FeedLayout {
        &self.layout
    }

    /// Decode a single row. Returns `None` when the row has no `uuid`.
    pub fn decode_row(&self, row: &[String]) -> Option<ProductRecord> {
        let uuid = self.cell(row, FeedField::Uuid);
        if uuid.is_empty() {
            return None;
        }

        Some(ProductRecord {
            uuid: uuid.to_string(),
            sku: self.cell(row, FeedField::Sku).to_string(),
            name: self.cell(row, FeedField::Name).to_string(),
            ready_for_sale: parse_ready_flag(self.cell(row, FeedField::ReadyForSale)),
            stock_count: parse_count(self.cell(row, FeedField::StockCount)),
            price: parse_price(self.cell(row, FeedField::Price)),
            short_desc: self.cell(row, FeedField::ShortDesc).to_string(),
        })
    }

    /// Validate every row, dropping those without a `uuid`.
    ///
    /// When the same `uuid` appears more than once, the later row's values
    /// replace the earlier ones in place and the superseded row is counted as
    /// skipped, so no batch ever carries the same key twice.
    pub fn validate(&self, rows: &[RawRow]) -> ValidationReport {
        let mut records: Vec<ProductRecord> = Vec::with_capacity(rows.len());
        let mut positions: HashMap<String, usize> = HashMap::with_capacity(rows.len());
        let mut skipped = 0u64;

        for (row_number, row) in rows.iter().enumerate() {
            let Some(record) = self.decode_row(row) else {
                debug!(row = row_number, "Dropping feed row without uuid");
                skipped += 1;
                continue;
            };

            if let Some(&position) = positions.get(&record.uuid) {
                warn!(
                    row = row_number,
                    uuid = %record.uuid,
                    "Duplicate uuid in feed, keeping latest values"
                );
                records[position] = record;
                skipped += 1;
            } else {
                positions.insert(record.uuid.clone(), records.len());
                records.push(record);
            }
        }

        ValidationReport { records, skipped }
    }

    fn cell<'a>(&self, row: &'a [String], field: FeedField) -> &'a str {
        self.layout
            .index_of(field)
            .and_then(|index| row.get(index))
            .map_or("", |value| value.trim())
    }
}

fn parse_ready_flag(value: &str) -> bool {
    value.eq_ignore_ascii_case(READY_SENTINEL)
}

fn parse_count(value: &str) -> i64 {
    value.parse::<i64>().map_or(0, |count| count.max(0))
}

fn parse_price(value: &str) -> f64 {
    match value.parse::<f64>() {
        Ok(price) if price.is_finite() && price > 0.0 => price,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn row(cells: &[&str]) -> RawRow {
        cells.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn decodes_full_row_with_trimming() {
        let validator = RecordValidator::default();
        let record = validator
            .decode_row(&row(&[" 123 ", " SKU-9", "Lamp  ", "Y", " 4 ", "19.5", " desk lamp "]))
            .unwrap();

        assert_eq!(
            record,
            ProductRecord {
                uuid: "123".into(),
                sku: "SKU-9".into(),
                name: "Lamp".into(),
                ready_for_sale: true,
                stock_count: 4,
                price: 19.5,
                short_desc: "desk lamp".into(),
            }
        );
    }

    #[rstest]
    #[case("Y", true)]
    #[case("y", true)]
    #[case(" Y ", true)]
    #[case("N", false)]
    #[case("yes", false)]
    #[case("", false)]
    fn ready_flag_follows_sentinel(#[case] raw: &str, #[case] expected: bool) {
        let validator = RecordValidator::default();
        let record = validator.decode_row(&row(&["1", "", "", raw])).unwrap();
        assert_eq!(record.ready_for_sale, expected);
    }

    #[rstest]
    #[case("12", 12)]
    #[case("abc", 0)]
    #[case("", 0)]
    #[case("-3", 0)]
    #[case("2.5", 0)]
    fn stock_count_falls_back_to_zero(#[case] raw: &str, #[case] expected: i64) {
        let validator = RecordValidator::default();
        let record = validator.decode_row(&row(&["1", "", "", "", raw])).unwrap();
        assert_eq!(record.stock_count, expected);
    }

    #[rstest]
    #[case("9.99", 9.99)]
    #[case("n/a", 0.0)]
    #[case("-1", 0.0)]
    #[case("inf", 0.0)]
    fn price_falls_back_to_zero(#[case] raw: &str, #[case] expected: f64) {
        let validator = RecordValidator::default();
        let record = validator
            .decode_row(&row(&["1", "", "", "", "", raw]))
            .unwrap();
        assert!((record.price - expected).abs() < f64::EPSILON);
    }

    #[test]
    fn short_rows_read_missing_cells_as_empty() {
        let validator = RecordValidator::default();
        let record = validator.decode_row(&row(&["abc", "sku"])).unwrap();
        assert_eq!(record.name, "");
        assert_eq!(record.stock_count, 0);
        assert_eq!(record.short_desc, "");
    }

    #[test]
    fn rows_without_uuid_are_dropped_and_counted() {
        let validator = RecordValidator::default();
        let report = validator.validate(&[
            row(&["", "sku-1", "No key"]),
            row(&["   ", "sku-2"]),
            row(&[]),
            row(&["k1", "sku-3", "Kept"]),
        ]);

        assert_eq!(report.skipped, 3);
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].uuid, "k1");
    }

    #[test]
    fn duplicate_uuid_keeps_latest_values_at_first_position() {
        let validator = RecordValidator::default();
        let report = validator.validate(&[
            row(&["a", "", "first"]),
            row(&["b", "", "other"]),
            row(&["a", "", "second"]),
        ]);

        assert_eq!(report.skipped, 1);
        let names: Vec<&str> = report.records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["second", "other"]);
    }

    #[test]
    fn header_matching_layout_passes() {
        let layout = FeedLayout::v1();
        let header = row(&[
            "UUID",
            "SKU",
            "Name",
            "Ready For Sale",
            "stock-count",
            "Price",
            "Short Desc",
            "extra",
        ]);
        assert!(layout.verify_header(&header).is_ok());
    }

    #[test]
    fn narrow_header_is_a_layout_mismatch() {
        let layout = FeedLayout::v1();
        let error = layout.verify_header(&row(&["uuid", "sku", "name"])).unwrap_err();
        assert!(matches!(error, SyncError::LayoutMismatch { .. }));
        assert!(!error.is_retriable());
    }

    #[test]
    fn reordered_header_is_a_layout_mismatch() {
        let layout = FeedLayout::v1();
        let header = row(&[
            "sku",
            "uuid",
            "name",
            "ready_for_sale",
            "stock_count",
            "price",
            "short_desc",
        ]);
        assert!(layout.verify_header(&header).is_err());
    }

    #[test]
    fn unknown_layout_version_is_none() {
        assert!(FeedLayout::by_version(1).is_some());
        assert!(FeedLayout::by_version(7).is_none());
    }
}
