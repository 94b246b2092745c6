//! Error types for docket.

use thiserror::Error;
use uuid::Uuid;

use crate::models::QueueName;

/// Result type alias using docket's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for docket operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The queue store backing service cannot be reached.
    #[error("Queue unavailable: {0}")]
    QueueUnavailable(String),

    /// Status query for a job the queue does not know.
    #[error("Job not found: {job_id} in queue {queue}")]
    JobNotFound { queue: QueueName, job_id: Uuid },

    /// Document row does not exist.
    #[error("Document not found: {0}")]
    DocumentNotFound(i64),

    /// Media type has no extraction strategy. Never retried.
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    /// Text extraction failed on corrupt or unreadable input.
    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    /// Enrichment backend failed for a reason other than the ones below.
    #[error("Enrichment failed: {0}")]
    EnrichmentFailed(String),

    /// Enrichment backend refused the call because of rate limiting.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Call to an external collaborator timed out.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Enrichment backend answered with something we cannot parse.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The caller no longer holds the lease on this job.
    #[error("Lease lost for job {0}")]
    LeaseLost(Uuid),

    /// Operation not allowed in the entity's current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a job that failed with this error may be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::QueueUnavailable(_)
                | Error::ExtractionFailed(_)
                | Error::EnrichmentFailed(_)
                | Error::RateLimited(_)
                | Error::Timeout(_)
                | Error::InvalidResponse(_)
                | Error::Request(_)
                | Error::Io(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else {
            Error::Request(e.to_string())
        }
    }
}
