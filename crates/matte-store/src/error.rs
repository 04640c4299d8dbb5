//! Job store error types.

use thiserror::Error;

use matte_models::{JobId, JobStatus, ModelError};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    /// A worker tried to write a job it does not hold.
    #[error("Worker {worker} does not own job {job_id}")]
    NotOwner { job_id: JobId, worker: String },

    #[error("Job {job_id}: invalid status transition {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    /// The job is in flight and cannot be removed.
    #[error("Job {job_id} is {status} and cannot be discarded")]
    InFlight { job_id: JobId, status: JobStatus },

    #[error("Submission rejected: {0}")]
    Rejected(#[from] ModelError),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Corrupt job record {job_id}: {message}")]
    Corrupt { job_id: String, message: String },

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn corrupt(job_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            job_id: job_id.into(),
            message: message.into(),
        }
    }

    pub fn not_owner(job_id: &JobId, worker: &str) -> Self {
        Self::NotOwner {
            job_id: job_id.clone(),
            worker: worker.to_string(),
        }
    }

    /// Whether the request itself was bad (as opposed to the store failing).
    pub fn is_rejection(&self) -> bool {
        matches!(self, StoreError::Rejected(_))
    }

    /// Whether the failure is in the backing store and may clear on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Redis(_) | StoreError::ConnectionFailed(_))
    }
}
