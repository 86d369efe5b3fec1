//! SQLite implementation of the batch upsert
//!
//! SQLite has no system column telling an insert from a conflict update, so
//! the table carries a `revision` counter: inserts start it at 1 and the
//! conflict branch increments it. `RETURNING revision` then classifies every
//! row from the same statement that wrote it, without a pre-read.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::debug;

use crate::domain::batch::{Batch, max_batch_size_for};
use crate::domain::record::{ProductRecord, StoredProduct};
use crate::domain::repositories::ProductStore;
use crate::domain::sync_error::StoreError;
use crate::domain::sync_summary::{BatchResult, UpsertOutcome};
use crate::infrastructure::store_errors::to_store_error;

/// SQLite bound-parameter ceiling (`SQLITE_MAX_VARIABLE_NUMBER` since 3.32)
pub const SQLITE_PARAM_LIMIT: usize = 32_766;

const CREATE_PRODUCTS_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS products (
        uuid TEXT PRIMARY KEY NOT NULL,
        sku TEXT NOT NULL DEFAULT '',
        name TEXT NOT NULL DEFAULT '',
        ready_for_sale BOOLEAN NOT NULL DEFAULT 0,
        stock_count INTEGER NOT NULL DEFAULT 0 CHECK (stock_count >= 0),
        price REAL NOT NULL DEFAULT 0 CHECK (price >= 0),
        short_desc TEXT NOT NULL DEFAULT '',
        revision INTEGER NOT NULL DEFAULT 1,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
"#;

const CREATE_SKU_INDEX_SQL: &str = "CREATE INDEX IF NOT EXISTS idx_products_sku ON products (sku)";

const UPSERT_CONFLICT_SQL: &str = r#"
    ON CONFLICT (uuid) DO UPDATE SET
        sku = excluded.sku,
        name = excluded.name,
        ready_for_sale = excluded.ready_for_sale,
        stock_count = excluded.stock_count,
        price = excluded.price,
        short_desc = excluded.short_desc,
        revision = products.revision + 1,
        updated_at = CURRENT_TIMESTAMP
    RETURNING uuid, revision
"#;

/// Product store backed by a SQLite pool
#[derive(Clone)]
pub struct SqliteProductStore {
    pool: SqlitePool,
}

impl SqliteProductStore {
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the `products` table if it does not exist
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_PRODUCTS_SQL)
            .execute(&self.pool)
            .await
            .map_err(|e| to_store_error(&e, "Failed to create products table"))?;
        sqlx::query(CREATE_SKU_INDEX_SQL)
            .execute(&self.pool)
            .await
            .map_err(|e| to_store_error(&e, "Failed to create products index"))?;
        Ok(())
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| to_store_error(&e, "Failed to count products"))
    }

    pub async fn find_by_uuid(&self, uuid: &str) -> Result<Option<StoredProduct>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT uuid, sku, name, ready_for_sale, stock_count, price, short_desc, created_at, updated_at
            FROM products WHERE uuid = ?
            "#,
        )
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| to_store_error(&e, "Failed to load product"))?;

        row.map(|row| -> Result<StoredProduct, sqlx::Error> {
            let created_at: NaiveDateTime = row.try_get("created_at")?;
            let updated_at: NaiveDateTime = row.try_get("updated_at")?;
            Ok(StoredProduct {
                record: ProductRecord {
                    uuid: row.try_get("uuid")?,
                    sku: row.try_get("sku")?,
                    name: row.try_get("name")?,
                    ready_for_sale: row.try_get("ready_for_sale")?,
                    stock_count: row.try_get("stock_count")?,
                    price: row.try_get("price")?,
                    short_desc: row.try_get("short_desc")?,
                },
                created_at: created_at.and_utc(),
                updated_at: updated_at.and_utc(),
            })
        })
        .transpose()
        .map_err(|e| to_store_error(&e, "Failed to decode product"))
    }
}

#[async_trait]
impl ProductStore for SqliteProductStore {
    async fn upsert_batch(&self, batch: &Batch) -> Result<BatchResult, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| to_store_error(&e, "Failed to begin transaction"))?;

        let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            "INSERT INTO products (uuid, sku, name, ready_for_sale, stock_count, price, short_desc, updated_at) ",
        );
        builder.push_values(batch.records(), |mut row, record| {
            row.push_bind(record.uuid.as_str())
                .push_bind(record.sku.as_str())
                .push_bind(record.name.as_str())
                .push_bind(record.ready_for_sale)
                .push_bind(record.stock_count)
                .push_bind(record.price)
                .push_bind(record.short_desc.as_str())
                .push("CURRENT_TIMESTAMP");
        });
        builder.push(UPSERT_CONFLICT_SQL);

        let rows = builder
            .build()
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| to_store_error(&e, "Failed to upsert product batch"))?;

        let mut outcomes = Vec::with_capacity(rows.len());
        for row in &rows {
            let revision: i64 = row
                .try_get("revision")
                .map_err(|e| to_store_error(&e, "Failed to read upsert result"))?;
            outcomes.push(UpsertOutcome::from_inserted(revision == 1));
        }

        tx.commit()
            .await
            .map_err(|e| to_store_error(&e, "Failed to commit product batch"))?;

        let result = BatchResult::from_outcomes(outcomes);
        debug!(
            inserted = result.inserted,
            updated = result.updated,
            total = result.total,
            "SQLite batch committed"
        );
        Ok(result)
    }

    fn max_batch_size(&self) -> usize {
        max_batch_size_for(SQLITE_PARAM_LIMIT)
    }
}
