//! Error types for the gamification engine.

use crate::types::QuestStatus;

/// Errors raised by persistence backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness constraint was violated
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The backend failed
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Errors surfaced by gamification operations.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// Record absent, or owned by someone else
    #[error("{0} not found")]
    NotFound(String),

    /// Status change not permitted by the quest lifecycle
    #[error("Invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: QuestStatus,
        to: QuestStatus,
        reason: &'static str,
    },

    /// Edit attempted on a completed quest outside the visibility flag
    #[error("Completed quests are immutable (attempted to change {0})")]
    ImmutableRecord(String),

    /// Field constraint violated
    #[error("Validation failed: {0}")]
    Validation(String),

    /// External text generation failed; recovered by the local fallback.
    /// Never returned from a service operation.
    #[error("Generation fell back to local text: {0}")]
    GenerationFallback(String),

    /// Username already taken
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Persistence failure
    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for VaultError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => VaultError::Conflict(msg),
            other => VaultError::Store(other),
        }
    }
}

/// Result type for vault operations.
pub type Result<T> = std::result::Result<T, VaultError>;
