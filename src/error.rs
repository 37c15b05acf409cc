use thiserror::Error;
use crate::validation::ValidationError;

/// SQLite primary result codes that mean "try again later".
const SQLITE_BUSY: i64 = 5;
const SQLITE_LOCKED: i64 = 6;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Conflicting update for {key}: {field} is already set to a different value")]
    Conflict { key: String, field: &'static str },

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid stored row: {0}")]
    InvalidRow(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Failures worth retrying for idempotent writes: lock contention, pool
    /// exhaustion and I/O hiccups.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(err) => match err {
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
                sqlx::Error::Database(db_err) => db_err
                    .code()
                    .and_then(|code| code.parse::<i64>().ok())
                    .map(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
                    .unwrap_or(false),
                _ => false,
            },
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_database_contention_is_transient() {
        assert!(StoreError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!StoreError::Database(sqlx::Error::RowNotFound).is_transient());
        assert!(!StoreError::NotFound("slot 1".to_string()).is_transient());
        assert!(!StoreError::Validation(ValidationError::MissingParameter("slot".into())).is_transient());
    }
}
