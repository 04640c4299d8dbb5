//! Structured job logging.
//!
//! Every event carries the job id, job type and worker id so lines from
//! concurrent jobs can be told apart.

use tracing::{debug, error, info, warn, Span};

use matte_models::{Job, JobId};

/// Job logger for lifecycle events of one job on one worker.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    job_type: String,
    worker: String,
}

impl JobLogger {
    pub fn new(job: &Job, worker: &str) -> Self {
        Self {
            job_id: job.id.to_string(),
            job_type: job.job_type.to_string(),
            worker: worker.to_string(),
        }
    }

    /// Logger for a job known only by id (sweeps, cleanup).
    pub fn for_id(job_id: &JobId, worker: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            job_type: "unknown".to_string(),
            worker: worker.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            job_type = %self.job_type,
            worker = %self.worker,
            "Job started: {}", message
        );
    }

    /// A pipeline stage finished.
    pub fn log_stage(&self, stage: &str, message: &str) {
        info!(
            job_id = %self.job_id,
            job_type = %self.job_type,
            worker = %self.worker,
            stage,
            "{}", message
        );
    }

    /// Progress inside a long stage. Frequent, so kept at debug.
    pub fn log_progress(&self, stage: &str, message: &str) {
        debug!(
            job_id = %self.job_id,
            job_type = %self.job_type,
            worker = %self.worker,
            stage,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            job_type = %self.job_type,
            worker = %self.worker,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, category: &str, message: &str) {
        error!(
            job_id = %self.job_id,
            job_type = %self.job_type,
            worker = %self.worker,
            category,
            "Job failed: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            job_type = %self.job_type,
            worker = %self.worker,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn worker(&self) -> &str {
        &self.worker
    }

    /// Span wrapping the whole job so nested media logs inherit its fields.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            job_type = %self.job_type,
            worker = %self.worker
        )
    }
}
