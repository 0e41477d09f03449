use thiserror::Error;

/// Failures of the accessor and queue collaborators
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Invalid state transition for submission {id}: {from} -> {to}")]
    InvalidTransition {
        id: i64,
        from: crate::types::SubmissionStatus,
        to: crate::types::SubmissionStatus,
    },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
