//! Worker error types.

use std::time::Duration;
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Invalid payload: {0}")]
    Payload(#[from] matte_models::ModelError),

    #[error("Media error: {0}")]
    Media(#[from] matte_media::MediaError),

    #[error("Storage error: {0}")]
    Storage(#[from] matte_storage::StorageError),

    #[error("Job store error: {0}")]
    Store(#[from] matte_store::StoreError),

    #[error("Job exceeded its {0:?} time limit")]
    JobTimeout(Duration),

    #[error("Job handler panicked: {0}")]
    Panicked(String),

    #[error("No handler for job type {0}")]
    Unsupported(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Media(e) => e.is_retryable(),
            WorkerError::Storage(e) => e.is_retryable(),
            WorkerError::Store(e) => e.is_transient(),
            WorkerError::Io(_) | WorkerError::JobTimeout(_) => true,
            _ => false,
        }
    }

    /// Short label used for metrics and logs.
    pub fn category(&self) -> &'static str {
        match self {
            WorkerError::Payload(_) => "validation",
            WorkerError::Media(matte_media::MediaError::Decode(_)) => "decode",
            WorkerError::Media(e) if e.is_timeout() => "timeout",
            WorkerError::Media(matte_media::MediaError::Stage { .. }) => "processing",
            WorkerError::Media(_) => "media",
            WorkerError::Storage(_) => "storage",
            WorkerError::Store(_) => "store",
            WorkerError::JobTimeout(_) => "timeout",
            WorkerError::Panicked(_) => "panic",
            WorkerError::Unsupported(_) => "unsupported",
            WorkerError::ConfigError(_) => "config",
            WorkerError::Internal(_) => "internal",
            WorkerError::Io(_) => "io",
        }
    }
}
