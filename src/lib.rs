//! Inventory Sync - periodic batch upsert of a product feed
//!
//! A spreadsheet feed is fetched, validated into product records, split into
//! parameter-bounded batches and written to SQLite or PostgreSQL with one
//! insert-or-update statement per batch. A scheduler repeats the run on a
//! fixed cadence and retries transient failures.

// Module declarations
pub mod application;
pub mod domain;
pub mod infrastructure;
