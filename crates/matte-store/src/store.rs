//! The job store contract.

use async_trait::async_trait;
use std::time::Duration;

use matte_models::{Job, JobId, JobStatus, JobType, NewJob, ResultRef};

use crate::error::StoreResult;

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// `memory` or `redis`
    pub backend: StoreBackend,
    /// Redis URL
    pub redis_url: String,
    /// Prefix for every Redis key
    pub key_prefix: String,
    /// Candidates examined per lane when racing other workers in `claim_next`
    pub claim_scan: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Redis,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Redis,
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "matte".to_string(),
            claim_scan: 16,
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let backend = match std::env::var("JOB_STORE").as_deref() {
            Ok("memory") => StoreBackend::Memory,
            _ => StoreBackend::Redis,
        };
        Self {
            backend,
            redis_url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: std::env::var("JOB_STORE_PREFIX").unwrap_or_else(|_| "matte".to_string()),
            claim_scan: std::env::var("JOB_STORE_CLAIM_SCAN")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(16),
        }
    }
}

/// Result of an atomic claim attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Claimed(Job),
    /// Someone else got there first, or the job is not queued.
    AlreadyClaimed { status: JobStatus },
    NotFound,
}

impl ClaimOutcome {
    pub fn into_job(self) -> Option<Job> {
        match self {
            ClaimOutcome::Claimed(job) => Some(job),
            _ => None,
        }
    }
}

/// Filter for [`JobStore::list`]. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub job_type: Option<JobType>,
    pub parent_id: Option<JobId>,
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, job_type: JobType) -> Self {
        self.job_type = Some(job_type);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.status.map_or(true, |s| job.status == s)
            && self.job_type.map_or(true, |t| job.job_type == t)
            && self.parent_id.as_ref().map_or(true, |p| job.parent_id.as_ref() == Some(p))
    }
}

/// Shared job table. Every mutation is atomic with respect to the job's status.
///
/// Writes after a claim are checked against `claimed_by`; a worker that lost
/// its claim to a sweep gets [`NotOwner`](crate::StoreError::NotOwner).
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Validate and enqueue a submission.
    async fn submit(&self, new_job: NewJob) -> StoreResult<Job>;

    async fn get(&self, id: &JobId) -> StoreResult<Job>;

    /// Jobs matching `filter`, oldest first.
    async fn list(&self, filter: &JobFilter) -> StoreResult<Vec<Job>>;

    async fn children(&self, parent_id: &JobId) -> StoreResult<Vec<Job>> {
        self.list(&JobFilter {
            parent_id: Some(parent_id.clone()),
            ..Default::default()
        })
        .await
    }

    /// `queued → pending_process` for a specific job.
    async fn claim(&self, id: &JobId, worker: &str) -> StoreResult<ClaimOutcome>;

    /// Claim the next job this worker can run.
    ///
    /// Keying jobs are served first, by priority and then submission order.
    /// Remaining accepted types follow in submission order.
    async fn claim_next(&self, worker: &str, accepted: &[JobType]) -> StoreResult<Option<Job>>;

    /// `pending_process → processing`.
    async fn begin_processing(&self, id: &JobId, worker: &str) -> StoreResult<Job>;

    /// Refresh `updated_at` so the sweeper leaves the job alone.
    async fn heartbeat(&self, id: &JobId, worker: &str) -> StoreResult<()>;

    /// `processing → completed` with the result references.
    async fn complete(&self, id: &JobId, worker: &str, results: Vec<ResultRef>) -> StoreResult<Job>;

    /// Any in-flight status `→ failed` with error text.
    async fn fail(&self, id: &JobId, worker: &str, error: &str) -> StoreResult<Job>;

    /// `failed → queued`, clearing error text and results.
    async fn retry(&self, id: &JobId) -> StoreResult<Job>;

    /// Delete a finished job.
    async fn discard(&self, id: &JobId) -> StoreResult<()>;

    /// Return in-flight jobs not updated within `threshold` to the queue.
    async fn requeue_stale(&self, threshold: Duration) -> StoreResult<Vec<Job>>;
}
