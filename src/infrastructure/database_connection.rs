// Database connection and pool management
// Opens a SQLite or PostgreSQL pool depending on the configured URL

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::domain::repositories::ProductStore;
use crate::infrastructure::config::{DatabaseBackend, DatabaseConfig, backend_for_url};
use crate::infrastructure::postgres_product_store::PgProductStore;
use crate::infrastructure::sqlite_product_store::SqliteProductStore;

const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub enum DatabaseConnection {
    Sqlite(SqlitePool),
    Postgres(PgPool),
}

impl DatabaseConnection {
    /// Open a pool for `config`, sized and timed out from its settings
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let url = config.connection_url()?;
        let backend = backend_for_url(&url)?;

        let connection = match backend {
            DatabaseBackend::Sqlite => Self::Sqlite(connect_sqlite(&url, config).await?),
            DatabaseBackend::Postgres => Self::Postgres(connect_postgres(&url, config).await?),
        };

        info!(backend = ?backend, max_connections = config.max_connections, "Database pool ready");
        Ok(connection)
    }

    /// SQLite URL with default pool settings
    pub async fn new(database_url: &str) -> Result<Self> {
        let config = DatabaseConfig {
            url: database_url.to_string(),
            ..DatabaseConfig::default()
        };
        Self::connect(&config).await
    }

    pub const fn backend(&self) -> DatabaseBackend {
        match self {
            Self::Sqlite(_) => DatabaseBackend::Sqlite,
            Self::Postgres(_) => DatabaseBackend::Postgres,
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            Self::Sqlite(pool) => pool.is_closed(),
            Self::Postgres(pool) => pool.is_closed(),
        }
    }

    /// Create the products table on whichever backend is connected
    pub async fn migrate(&self) -> Result<()> {
        match self {
            Self::Sqlite(pool) => SqliteProductStore::new(pool.clone()).migrate().await?,
            Self::Postgres(pool) => PgProductStore::new(pool.clone()).migrate().await?,
        }
        Ok(())
    }

    /// Product store over this connection's pool
    pub fn product_store(&self) -> Arc<dyn ProductStore> {
        match self {
            Self::Sqlite(pool) => Arc::new(SqliteProductStore::new(pool.clone())),
            Self::Postgres(pool) => Arc::new(PgProductStore::new(pool.clone())),
        }
    }

    pub async fn close(&self) {
        match self {
            Self::Sqlite(pool) => pool.close().await,
            Self::Postgres(pool) => pool.close().await,
        }
    }
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

async fn connect_sqlite(url: &str, config: &DatabaseConfig) -> Result<SqlitePool> {
    let memory = is_memory_url(url);

    if !memory {
        let db_path = url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");
        let db_path = db_path.split('?').next().unwrap_or(db_path);
        if let Some(parent) = Path::new(db_path).parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create database directory {}", parent.display())
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(url)
        .with_context(|| format!("Invalid SQLite url: {url}"))?
        .create_if_missing(true)
        .busy_timeout(SQLITE_BUSY_TIMEOUT);
    let options = if memory {
        options
    } else {
        options.journal_mode(SqliteJournalMode::Wal)
    };

    // Every connection to `sqlite::memory:` opens its own database
    let pool_options = if memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .idle_timeout(config.idle_timeout())
    };

    pool_options
        .acquire_timeout(config.connect_timeout())
        .connect_with(options)
        .await
        .context("Failed to open SQLite pool")
}

async fn connect_postgres(url: &str, config: &DatabaseConfig) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .idle_timeout(config.idle_timeout())
        .acquire_timeout(config.connect_timeout())
        .connect(url)
        .await
        .context("Failed to open PostgreSQL pool")
}
