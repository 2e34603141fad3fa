//! Error types for QuizRank.

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the progression, achievement and leaderboard services.
#[derive(Error, Debug)]
pub enum ProgressionError {
    /// Malformed input (negative counts, unknown difficulty or window). Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A required identity lookup found nothing.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The authoritative store failed; the operation did not complete.
    #[error("Store error: {0}")]
    Store(String),

    /// Optimistic update for one user kept losing races.
    #[error("Contention on user {user_id} after {attempts} attempts")]
    Contention { user_id: Uuid, attempts: u32 },

    #[error("Config error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProgressionError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ProgressionError::Validation(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        ProgressionError::Store(msg.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, ProgressionError::Validation(_))
    }
}

/// Transient cache failures. Logged and treated as a miss, never returned to callers.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache tier unavailable: {0}")]
    Unavailable(String),

    #[error("Cache operation timed out")]
    Timeout,

    #[error("Batch get not supported by this store")]
    BatchUnsupported,

    #[error("Primary tier circuit open")]
    CircuitOpen,

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ProgressionError>;
