//! Error types for questvault-store

use questvault::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SqliteStoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SqliteStoreError {
    /// Whether a UNIQUE or PRIMARY KEY constraint rejected the write.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            SqliteStoreError::Sqlite(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

impl From<SqliteStoreError> for StoreError {
    fn from(err: SqliteStoreError) -> Self {
        if err.is_constraint_violation() {
            StoreError::Conflict(err.to_string())
        } else {
            StoreError::Backend(err.to_string())
        }
    }
}
