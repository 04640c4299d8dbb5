//! Job handler contract and the context handed to each job.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinError;

use matte_models::{Job, JobType, ResultRef};

use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::workdir::WorkDir;

/// What a handler gets for one claimed job.
pub struct JobContext {
    pub job: Job,
    pub worker_id: String,
    pub work_dir: WorkDir,
    pub logger: JobLogger,
}

/// Runs jobs of one type to completion.
///
/// A handler returns result references or an error; the executor owns every
/// status transition.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> JobType;

    async fn handle(&self, ctx: &JobContext) -> WorkerResult<Vec<ResultRef>>;
}

/// Handlers by job type. The worker only claims types it has a handler for.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(handler.job_type(), handler);
        self
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&job_type).cloned()
    }

    /// Accepted types, keying first so the order is stable.
    pub fn job_types(&self) -> Vec<JobType> {
        JobType::ALL
            .into_iter()
            .filter(|t| self.handlers.contains_key(t))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Turn a failed task join into a job error, keeping the panic text.
pub fn join_error(err: JoinError) -> WorkerError {
    if err.is_panic() {
        let payload = err.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        WorkerError::Panicked(message)
    } else {
        WorkerError::internal("task cancelled")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(JobType);

    #[async_trait]
    impl JobHandler for Noop {
        fn job_type(&self) -> JobType {
            self.0
        }

        async fn handle(&self, _ctx: &JobContext) -> WorkerResult<Vec<ResultRef>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_registry_order() {
        let registry = HandlerRegistry::new()
            .register(Arc::new(Noop(JobType::Animation)))
            .register(Arc::new(Noop(JobType::Keying)));
        assert_eq!(registry.job_types(), vec![JobType::Keying, JobType::Animation]);
        assert!(registry.get(JobType::VideoStitching).is_none());
    }

    #[tokio::test]
    async fn test_join_error_keeps_panic_text() {
        let err = tokio::spawn(async { panic!("frame buffer exploded") }).await.unwrap_err();
        match join_error(err) {
            WorkerError::Panicked(msg) => assert!(msg.contains("frame buffer exploded")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
