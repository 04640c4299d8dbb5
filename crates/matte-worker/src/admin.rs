//! Operator actions on finished jobs.
//!
//! A job's stored results live under its key prefix; removing or retrying a
//! job through here keeps the result store in step with the job table.

use std::sync::Arc;
use tracing::info;

use matte_models::{Job, JobId, JobStatus};
use matte_storage::{job_prefix, ResultStore, StorageError};
use matte_store::{JobFilter, JobStore, StoreError};

use crate::error::{WorkerError, WorkerResult};
use crate::retry::{retry_async_when, RetryConfig};

/// Retry and discard for failed or completed jobs.
#[derive(Clone)]
pub struct JobAdmin {
    store: Arc<dyn JobStore>,
    results: Arc<dyn ResultStore>,
}

impl JobAdmin {
    pub fn new(store: Arc<dyn JobStore>, results: Arc<dyn ResultStore>) -> Self {
        Self { store, results }
    }

    /// Delete a finished job and every result stored for it.
    ///
    /// Returns how many stored objects went with it.
    pub async fn discard(&self, id: &JobId) -> WorkerResult<u32> {
        self.store.discard(id).await?;
        let removed = self.delete_results(id).await?;
        info!(job_id = %id, removed, "Discarded job");
        Ok(removed)
    }

    /// Discard every failed job, returning how many were removed.
    pub async fn clear_failed(&self) -> WorkerResult<usize> {
        let failed = self.store.list(&JobFilter::status(JobStatus::Failed)).await?;
        let mut removed = 0;
        for job in failed {
            match self.discard(&job.id).await {
                Ok(_) => removed += 1,
                // Retried or discarded by someone else in the meantime.
                Err(WorkerError::Store(StoreError::NotFound(_) | StoreError::InFlight { .. })) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }

    /// Put a failed job back in the queue. Results uploaded before the
    /// failure are removed; the next attempt stores its own.
    pub async fn retry(&self, id: &JobId) -> WorkerResult<Job> {
        let job = self.store.retry(id).await?;
        let removed = self.delete_results(id).await?;
        info!(job_id = %id, removed, "Requeued failed job");
        Ok(job)
    }

    async fn delete_results(&self, id: &JobId) -> WorkerResult<u32> {
        let prefix = job_prefix(id);
        let retry = RetryConfig::new("delete_results");
        let removed = retry_async_when(&retry, StorageError::is_retryable, || {
            self.results.delete_prefix(&prefix)
        })
        .await
        .into_result()?;
        Ok(removed)
    }
}
