//! PostgreSQL implementation of the batch upsert
//!
//! `xmax` is zero on a freshly inserted tuple and non-zero on one rewritten by
//! the conflict branch, so `RETURNING (xmax = 0)` classifies each row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::debug;

use crate::domain::batch::{Batch, max_batch_size_for};
use crate::domain::record::{ProductRecord, StoredProduct};
use crate::domain::repositories::ProductStore;
use crate::domain::sync_error::StoreError;
use crate::domain::sync_summary::{BatchResult, UpsertOutcome};
use crate::infrastructure::store_errors::to_store_error;

/// PostgreSQL wire protocol bind-parameter ceiling
pub const POSTGRES_PARAM_LIMIT: usize = 65_535;

const CREATE_PRODUCTS_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS products (
        uuid TEXT PRIMARY KEY,
        sku TEXT NOT NULL DEFAULT '',
        name TEXT NOT NULL DEFAULT '',
        ready_for_sale BOOLEAN NOT NULL DEFAULT FALSE,
        stock_count BIGINT NOT NULL DEFAULT 0 CHECK (stock_count >= 0),
        price DOUBLE PRECISION NOT NULL DEFAULT 0 CHECK (price >= 0),
        short_desc TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
"#;

const CREATE_SKU_INDEX_SQL: &str = "CREATE INDEX IF NOT EXISTS idx_products_sku ON products (sku)";

const UPSERT_CONFLICT_SQL: &str = r#"
    ON CONFLICT (uuid) DO UPDATE SET
        sku = EXCLUDED.sku,
        name = EXCLUDED.name,
        ready_for_sale = EXCLUDED.ready_for_sale,
        stock_count = EXCLUDED.stock_count,
        price = EXCLUDED.price,
        short_desc = EXCLUDED.short_desc,
        updated_at = NOW()
    RETURNING uuid, (xmax = 0) AS inserted
"#;

/// Product store backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PgProductStore {
    pool: PgPool,
}

impl PgProductStore {
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

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
            FROM products WHERE uuid = $1
            "#,
        )
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| to_store_error(&e, "Failed to load product"))?;

        row.map(|row| -> Result<StoredProduct, sqlx::Error> {
            let created_at: DateTime<Utc> = row.try_get("created_at")?;
            let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
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
                created_at,
                updated_at,
            })
        })
        .transpose()
        .map_err(|e| to_store_error(&e, "Failed to decode product"))
    }
}

fn build_upsert(batch: &Batch) -> QueryBuilder<'_, Postgres> {
    let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(
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
            .push("NOW()");
    });
    builder.push(UPSERT_CONFLICT_SQL);
    builder
}

#[async_trait]
impl ProductStore for PgProductStore {
    async fn upsert_batch(&self, batch: &Batch) -> Result<BatchResult, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| to_store_error(&e, "Failed to begin transaction"))?;

        let rows = build_upsert(batch)
            .build()
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| to_store_error(&e, "Failed to upsert product batch"))?;

        let mut outcomes = Vec::with_capacity(rows.len());
        for row in &rows {
            let inserted: bool = row
                .try_get("inserted")
                .map_err(|e| to_store_error(&e, "Failed to read upsert result"))?;
            outcomes.push(UpsertOutcome::from_inserted(inserted));
        }

        tx.commit()
            .await
            .map_err(|e| to_store_error(&e, "Failed to commit product batch"))?;

        let result = BatchResult::from_outcomes(outcomes);
        debug!(
            inserted = result.inserted,
            updated = result.updated,
            total = result.total,
            "PostgreSQL batch committed"
        );
        Ok(result)
    }

    fn max_batch_size(&self) -> usize {
        max_batch_size_for(POSTGRES_PARAM_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_record_batch() -> Batch {
        Batch::new(vec![ProductRecord::new("a"), ProductRecord::new("b")]).unwrap()
    }

    #[test]
    fn statement_binds_seven_parameters_per_record() {
        let batch = two_record_batch();
        let builder = build_upsert(&batch);
        let sql = builder.sql();

        assert!(sql.contains("$14"));
        assert!(!sql.contains("$15"));
        assert_eq!(sql.matches("NOW()").count(), 3);
    }

    #[test]
    fn statement_reports_insert_classification() {
        let batch = two_record_batch();
        let builder = build_upsert(&batch);
        let sql = builder.sql();

        assert!(sql.contains("ON CONFLICT (uuid) DO UPDATE"));
        assert!(sql.contains("(xmax = 0) AS inserted"));
    }

    #[test]
    fn ceiling_is_derived_from_wire_limit() {
        assert_eq!(max_batch_size_for(POSTGRES_PARAM_LIMIT), 9_362);
    }

    /// Runs only when `INVENTORY_SYNC_TEST_PG_URL` points at a scratch database
    #[tokio::test]
    async fn live_insert_then_update() {
        let Ok(url) = std::env::var("INVENTORY_SYNC_TEST_PG_URL") else {
            return;
        };
        let pool = PgPool::connect(&url).await.unwrap();
        let store = PgProductStore::new(pool);
        store.migrate().await.unwrap();

        let uuid = format!("pg-test-{}", uuid::Uuid::new_v4());
        let batch = Batch::new(vec![ProductRecord::new(uuid.clone()).with_stock_count(2)]).unwrap();

        assert_eq!(store.upsert_batch(&batch).await.unwrap(), BatchResult::new(1, 0));
        assert_eq!(store.upsert_batch(&batch).await.unwrap(), BatchResult::new(0, 1));

        let stored = store.find_by_uuid(&uuid).await.unwrap().unwrap();
        assert_eq!(stored.record.stock_count, 2);

        sqlx::query("DELETE FROM products WHERE uuid = $1")
            .bind(&uuid)
            .execute(store.pool())
            .await
            .unwrap();
    }
}
