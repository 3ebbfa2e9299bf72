//! Error types for the PostgreSQL store.

use loadtest_engine::StoreError;
use thiserror::Error;
use tokio_postgres::error::SqlState;

/// Errors that can occur while talking to PostgreSQL or CockroachDB.
#[derive(Error, Debug)]
pub enum PostgresStoreError {
    /// PostgreSQL connection or query error.
    #[error("PostgreSQL error: {0}")]
    PostgreSQL(#[from] tokio_postgres::Error),

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The pool was closed while waiting for a connection.
    #[error("connection pool is closed")]
    PoolClosed,
}

impl PostgresStoreError {
    /// SQLSTATE of the underlying database error, if any.
    pub fn code(&self) -> Option<&SqlState> {
        match self {
            PostgresStoreError::PostgreSQL(e) => e.code(),
            _ => None,
        }
    }

    /// Serialization failures and deadlocks; the transaction may be re-run.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self.code(),
            Some(code) if *code == SqlState::T_R_SERIALIZATION_FAILURE
                || *code == SqlState::T_R_DEADLOCK_DETECTED
        )
    }
}

impl From<PostgresStoreError> for StoreError {
    fn from(err: PostgresStoreError) -> Self {
        if err.is_conflict() {
            let message = match &err {
                PostgresStoreError::PostgreSQL(e) => e
                    .as_db_error()
                    .map(|db| format!("{} ({})", db.message(), db.code().code()))
                    .unwrap_or_else(|| e.to_string()),
                other => other.to_string(),
            };
            StoreError::Conflict(message)
        } else {
            StoreError::backend(err)
        }
    }
}

/// Shorthand for mapping a driver error straight into a [`StoreError`].
pub(crate) fn store_err(err: tokio_postgres::Error) -> StoreError {
    PostgresStoreError::from(err).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_database_errors_are_not_conflicts() {
        assert!(!PostgresStoreError::PoolClosed.is_conflict());
        let err: StoreError = PostgresStoreError::Connection("refused".into()).into();
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "Connection error: refused");
    }
}
