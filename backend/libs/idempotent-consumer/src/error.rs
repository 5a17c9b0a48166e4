//! Error types for consumption-record persistence

use thiserror::Error;

/// Result type for repository operations
pub type PersistenceResult<T> = Result<T, PersistenceError>;

#[derive(Error, Debug)]
pub enum PersistenceError {
    /// A record with this message id already exists (PostgreSQL 23505)
    #[error("Duplicate message id: {0}")]
    DuplicateMessageId(String),

    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    /// Pool exhausted, closed or the connection dropped
    #[error("Persistence store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be mapped back to a record
    #[error("Invalid stored record: {0}")]
    InvalidRecord(String),
}

impl From<sqlx::Error> for PersistenceError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                PersistenceError::Unavailable(err.to_string())
            }
            sqlx::Error::Io(io) => PersistenceError::Unavailable(io.to_string()),
            other => PersistenceError::Database(other),
        }
    }
}

impl PersistenceError {
    /// The insert lost a race on the unique message id
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, PersistenceError::DuplicateMessageId(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, PersistenceError::Unavailable(_))
    }
}

/// PostgreSQL unique violation (23505)
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db_err| db_err.code())
        .map(|code| code == "23505")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_errors_are_transient() {
        let err: PersistenceError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_transient());
        assert!(!err.is_duplicate_key());

        let err: PersistenceError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, PersistenceError::Database(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_duplicate_key() {
        let err = PersistenceError::DuplicateMessageId("m-1".to_string());
        assert!(err.is_duplicate_key());
        assert_eq!(err.to_string(), "Duplicate message id: m-1");
    }
}
