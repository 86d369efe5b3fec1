//! Mapping of sqlx failures onto retriable / non-retriable store errors
//!
//! Connectivity, pool exhaustion and lock contention are transient: the same
//! batch can be re-submitted later. Constraint, type and syntax failures are
//! about the data or the statement itself and will fail again.

use sqlx::error::{DatabaseError, ErrorKind};

use crate::domain::sync_error::{FailureKind, StoreError};

/// SQLite primary result codes worth retrying: BUSY, LOCKED, IOERR, PROTOCOL
const SQLITE_TRANSIENT_CODES: [i64; 4] = [5, 6, 10, 15];

/// PostgreSQL SQLSTATE classes worth retrying: connection exception,
/// transaction rollback, insufficient resources, operator intervention
const POSTGRES_TRANSIENT_CLASSES: [&str; 4] = ["08", "40", "53", "57"];

/// Classify a sqlx error for the scheduler.
pub fn classify(error: &sqlx::Error) -> FailureKind {
    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => FailureKind::Retriable,
        sqlx::Error::Database(db_error) => classify_database_error(db_error.as_ref()),
        _ => FailureKind::NonRetriable,
    }
}

fn classify_database_error(error: &dyn DatabaseError) -> FailureKind {
    match error.kind() {
        ErrorKind::UniqueViolation
        | ErrorKind::ForeignKeyViolation
        | ErrorKind::NotNullViolation
        | ErrorKind::CheckViolation => return FailureKind::NonRetriable,
        _ => {}
    }

    let transient = error
        .code()
        .is_some_and(|code| is_transient_code(code.as_ref()));

    if transient {
        FailureKind::Retriable
    } else {
        FailureKind::NonRetriable
    }
}

/// True for SQLite numeric result codes and PostgreSQL SQLSTATEs that
/// signal a transient condition.
pub fn is_transient_code(code: &str) -> bool {
    if let Ok(numeric) = code.parse::<i64>() {
        // SQLite reports extended codes; the primary code is the low byte.
        // Five-digit SQLSTATEs such as "40001" also parse, so only treat
        // values that fit an extended SQLite code as numeric.
        if code.len() < 5 {
            return SQLITE_TRANSIENT_CODES.contains(&(numeric & 0xff));
        }
    }

    code.len() == 5 && POSTGRES_TRANSIENT_CLASSES.iter().any(|class| code.starts_with(class))
}

/// Wrap a sqlx error with context and its classification.
pub fn to_store_error(error: &sqlx::Error, context: &str) -> StoreError {
    StoreError {
        kind: classify(error),
        message: format!("{context}: {error}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[test]
    fn connectivity_errors_are_retriable() {
        assert_eq!(classify(&sqlx::Error::PoolTimedOut), FailureKind::Retriable);
        assert_eq!(classify(&sqlx::Error::PoolClosed), FailureKind::Retriable);
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert_eq!(classify(&sqlx::Error::Io(io)), FailureKind::Retriable);
    }

    #[test]
    fn row_not_found_is_not_retriable() {
        assert_eq!(classify(&sqlx::Error::RowNotFound), FailureKind::NonRetriable);
    }

    #[test]
    fn sqlite_busy_and_locked_codes_are_transient() {
        assert!(is_transient_code("5"));
        assert!(is_transient_code("6"));
        assert!(is_transient_code("517")); // SQLITE_BUSY_SNAPSHOT
        assert!(!is_transient_code("19")); // SQLITE_CONSTRAINT
        assert!(!is_transient_code("275")); // SQLITE_CONSTRAINT_CHECK
    }

    #[test]
    fn postgres_sqlstate_classes() {
        assert!(is_transient_code("08006"));
        assert!(is_transient_code("40001"));
        assert!(is_transient_code("40P01"));
        assert!(is_transient_code("53300"));
        assert!(!is_transient_code("23505"));
        assert!(!is_transient_code("22P02"));
        assert!(!is_transient_code("42601"));
    }

    #[tokio::test]
    async fn check_violation_is_not_retriable() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query("CREATE TABLE t (n INTEGER NOT NULL CHECK (n >= 0))")
            .execute(&pool)
            .await
            .unwrap();

        let error = sqlx::query("INSERT INTO t (n) VALUES (-1)")
            .execute(&pool)
            .await
            .unwrap_err();

        let store_error = to_store_error(&error, "insert");
        assert_eq!(store_error.kind, FailureKind::NonRetriable);
        assert!(store_error.message.starts_with("insert: "));
    }
}
