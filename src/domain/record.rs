//! Product records flowing from the feed into the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of bound parameters one record contributes to an upsert statement.
pub const FIELDS_PER_RECORD: usize = 7;

/// One positional row exactly as the feed returned it.
pub type RawRow = Vec<String>;

/// Everything a feed fetch returns: an optional header row plus data rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFeed {
    pub header: Option<RawRow>,
    pub rows: Vec<RawRow>,
}

impl RawFeed {
    /// Feed without a header row
    pub fn from_rows(rows: Vec<RawRow>) -> Self {
        Self { header: None, rows }
    }

    pub fn with_header(header: RawRow, rows: Vec<RawRow>) -> Self {
        Self {
            header: Some(header),
            rows,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A validated product row, keyed by its stable `uuid`.
///
/// Records are plain values. Nothing here is ever mutated once the validator
/// has produced it; the store only reads them while binding a statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    /// Natural key, never empty
    pub uuid: String,
    pub sku: String,
    pub name: String,
    #[serde(rename = "readyForSale")]
    pub ready_for_sale: bool,
    #[serde(rename = "stockCount")]
    pub stock_count: i64,
    pub price: f64,
    #[serde(rename = "shortDesc")]
    pub short_desc: String,
}

impl ProductRecord {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            sku: String::new(),
            name: String::new(),
            ready_for_sale: false,
            stock_count: 0,
            price: 0.0,
            short_desc: String::new(),
        }
    }

    pub fn with_sku(mut self, sku: impl Into<String>) -> Self {
        self.sku = sku.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_ready_for_sale(mut self, ready: bool) -> Self {
        self.ready_for_sale = ready;
        self
    }

    pub fn with_stock_count(mut self, stock_count: i64) -> Self {
        self.stock_count = stock_count.max(0);
        self
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = if price.is_finite() && price > 0.0 { price } else { 0.0 };
        self
    }

    pub fn with_short_desc(mut self, short_desc: impl Into<String>) -> Self {
        self.short_desc = short_desc.into();
        self
    }
}

/// A record as currently persisted, with store-managed timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredProduct {
    #[serde(flatten)]
    pub record: ProductRecord,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}
