//! Infrastructure layer: configuration, logging, database pools, the two
//! relational product stores and the HTTP feed source with its credentials.

pub mod config;
pub mod database_connection;
pub mod logging;
pub mod postgres_product_store;
pub mod service_account;
pub mod sheets_feed_source;
pub mod sqlite_product_store;
pub mod store_errors;

// Re-export commonly used items
pub use config::{
    AppConfig, ConfigError, DatabaseBackend, DatabaseConfig, FeedConfig, LoggingConfig,
    SyncConfig,
};
pub use database_connection::DatabaseConnection;
pub use logging::{get_log_directory, init_logging, log_system_info};
pub use postgres_product_store::PgProductStore;
pub use service_account::ServiceAccountTokenSource;
pub use sheets_feed_source::{SheetsAuth, SheetsFeedSource, StaticFeedSource};
pub use sqlite_product_store::SqliteProductStore;
pub use store_errors::{classify, to_store_error};
