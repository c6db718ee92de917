use thiserror::Error;

use crate::queue::Channel;

/// Errors raised while talking to the message queue.
/// Never retried internally; the caller owns the retry policy.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue transport error: {0}")]
    Transport(String),

    #[error("No queue configured for channel {0}")]
    UnroutedChannel(Channel),

    #[error("Invalid receipt handle: {0}")]
    InvalidReceipt(String),

    #[error("Failed to build queue request: {0}")]
    Build(String),

    #[error("Envelope serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by a resume store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Document serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Concurrent modification of resume {resume_id} after {attempts} attempts")]
    Conflict { resume_id: String, attempts: u32 },
}

/// Pipeline-level error type returned by handlers, workers and the resume service.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Resume not found: {resume_id} (user {user_id})")]
    ResumeNotFound { resume_id: String, user_id: String },

    #[error("PDF render error: {0}")]
    Render(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn not_found(resume_id: &str, user_id: &str) -> Self {
        PipelineError::ResumeNotFound {
            resume_id: resume_id.to_string(),
            user_id: user_id.to_string(),
        }
    }
}
