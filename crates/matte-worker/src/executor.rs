//! Job executor: a fixed pool of job slots fed from the job store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use matte_models::{Job, JobId, JobType, ResultRef};
use matte_store::{JobStore, StoreError};

use crate::aggregate::ParentAggregator;
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::handler::{join_error, HandlerRegistry, JobContext};
use crate::logging::JobLogger;
use crate::metrics;
use crate::retry::{retry_async_when, FailureTracker, RetryConfig};
use crate::sweeper::StaleJobSweeper;
use crate::workdir::{remove_stale, WorkDir};

/// How a job ended on this worker.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(Vec<ResultRef>),
    Failed { category: &'static str, message: String },
}

struct Shared {
    config: WorkerConfig,
    store: Arc<dyn JobStore>,
    handlers: HandlerRegistry,
    parents: ParentAggregator,
}

/// Job executor that claims and runs jobs.
pub struct JobExecutor {
    shared: Arc<Shared>,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
}

impl JobExecutor {
    pub fn new(config: WorkerConfig, store: Arc<dyn JobStore>, handlers: HandlerRegistry) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = watch::channel(false);
        let parents = ParentAggregator::new(Arc::clone(&store), config.worker_id.clone());
        Self {
            shared: Arc::new(Shared {
                config,
                store,
                handlers,
                parents,
            }),
            job_semaphore,
            shutdown,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.shared.config.worker_id
    }

    /// Claim and run jobs until [`shutdown`](Self::shutdown) is called.
    pub async fn run(&self) -> WorkerResult<()> {
        let config = &self.shared.config;
        if self.shared.handlers.is_empty() {
            return Err(WorkerError::config_error("no job handlers registered"));
        }
        let accepted = self.shared.handlers.job_types();
        tokio::fs::create_dir_all(&config.work_dir).await?;

        info!(
            worker = %config.worker_id,
            max_jobs = config.max_concurrent_jobs,
            types = ?accepted,
            "Starting job executor"
        );

        let sweeper = StaleJobSweeper::new(
            Arc::clone(&self.shared.store),
            config.work_dir.clone(),
            config.stale_threshold,
            config.sweep_interval,
        )
        .with_parents(self.shared.parents.clone());
        let sweeper_shutdown = self.shutdown.subscribe();
        let sweep_task = tokio::spawn(async move { sweeper.run(sweeper_shutdown).await });

        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, no longer claiming jobs");
                        break;
                    }
                }
                claimed = self.claim_one(&accepted) => {
                    match claimed {
                        Ok(true) => {}
                        Ok(false) => tokio::time::sleep(config.poll_interval).await,
                        Err(e) => {
                            error!("Error claiming jobs: {}", e);
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
            }
        }

        sweep_task.await.map_err(join_error)?;

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                "Jobs still running after {:?}; the sweeper will requeue them",
                config.shutdown_timeout
            );
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Jobs currently holding a slot.
    pub fn jobs_in_flight(&self) -> usize {
        in_flight(&self.job_semaphore, self.shared.config.max_concurrent_jobs)
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Wait for a free slot, claim one job and start it.
    ///
    /// Returns `false` when there was nothing to claim.
    async fn claim_one(&self, accepted: &[JobType]) -> WorkerResult<bool> {
        let permit = Arc::clone(&self.job_semaphore)
            .acquire_owned()
            .await
            .map_err(|_| WorkerError::internal("Semaphore closed"))?;

        let Some(job) = self
            .shared
            .store
            .claim_next(&self.shared.config.worker_id, accepted)
            .await?
        else {
            return Ok(false);
        };

        debug!(job_id = %job.id, "Claimed job");
        let shared = Arc::clone(&self.shared);
        let semaphore = Arc::clone(&self.job_semaphore);
        tokio::spawn(async move {
            let max_jobs = shared.config.max_concurrent_jobs;
            metrics::set_jobs_in_flight(in_flight(&semaphore, max_jobs));
            Self::execute_job(shared, job).await;
            // Release the slot before sampling so the gauge drops with it.
            drop(permit);
            metrics::set_jobs_in_flight(in_flight(&semaphore, max_jobs));
        });
        Ok(true)
    }

    /// Run one already-claimed job to a terminal status.
    pub async fn execute(&self, job: Job) -> JobOutcome {
        Self::execute_job(Arc::clone(&self.shared), job).await
    }

    async fn execute_job(shared: Arc<Shared>, job: Job) -> JobOutcome {
        let logger = JobLogger::new(&job, &shared.config.worker_id);
        let span = logger.create_span();

        async move {
            let started = Instant::now();
            let job_id = job.id.clone();
            let job_type = job.job_type;
            let parent_id = job.parent_id.clone();
            logger.log_start(&format!("attempt {}", job.attempts));

            let outcome = match Self::run_job(&shared, job, logger.clone()).await {
                Ok(results) => {
                    Self::finish(&shared, &job_id, Ok(results.clone()), &logger).await;
                    JobOutcome::Completed(results)
                }
                Err(e) => {
                    let category = e.category();
                    let message = e.to_string();
                    logger.log_error(category, &message);
                    Self::finish(&shared, &job_id, Err(message.clone()), &logger).await;
                    JobOutcome::Failed { category, message }
                }
            };

            if let Err(e) = remove_stale(&shared.config.work_dir, &job_id).await {
                logger.log_warning(&format!("failed to remove work directory: {e}"));
            }

            if let Some(parent_id) = parent_id {
                match shared.parents.aggregate(&parent_id).await {
                    Ok(progress) => debug!(parent_id = %parent_id, ?progress, "Checked parent job"),
                    Err(e) => logger.log_warning(&format!("failed to update parent {parent_id}: {e}")),
                }
            }

            let label = match &outcome {
                JobOutcome::Completed(_) => "completed",
                JobOutcome::Failed { category, .. } => *category,
            };
            metrics::record_job(job_type.as_str(), label, started.elapsed().as_secs_f64());
            outcome
        }
        .instrument(span)
        .await
    }

    /// Everything between the claim and the final status write.
    async fn run_job(shared: &Shared, job: Job, logger: JobLogger) -> WorkerResult<Vec<ResultRef>> {
        let config = &shared.config;
        let handler = shared
            .handlers
            .get(job.job_type)
            .ok_or_else(|| WorkerError::Unsupported(job.job_type.to_string()))?;

        let work_dir = WorkDir::prepare(&config.work_dir, &job.id).await?;
        shared.store.begin_processing(&job.id, &config.worker_id).await?;

        let heartbeat = spawn_heartbeat(
            Arc::clone(&shared.store),
            job.id.clone(),
            config.worker_id.clone(),
            config.heartbeat_interval,
        );

        let ctx = Arc::new(JobContext {
            job,
            worker_id: config.worker_id.clone(),
            work_dir,
            logger,
        });

        // Spawned so a panic inside the handler surfaces as a JoinError.
        let task_ctx = Arc::clone(&ctx);
        let task = tokio::spawn(async move { handler.handle(&task_ctx).await });
        let abort = task.abort_handle();

        let result = match tokio::time::timeout(config.job_timeout, task).await {
            Ok(joined) => joined.map_err(join_error).and_then(|r| r),
            Err(_) => {
                // Dropping the handler future kills any ffmpeg child it owns.
                abort.abort();
                Err(WorkerError::JobTimeout(config.job_timeout))
            }
        };
        heartbeat.abort();
        result
    }

    /// Write the terminal status, retrying transient store failures.
    async fn finish(shared: &Shared, job_id: &JobId, result: Result<Vec<ResultRef>, String>, logger: &JobLogger) {
        let worker = shared.config.worker_id.as_str();
        let retry = RetryConfig::new("finish_job");

        let written = match &result {
            Ok(results) => retry_async_when(&retry, StoreError::is_transient, || {
                shared.store.complete(job_id, worker, results.clone())
            })
            .await
            .into_result()
            .map(|_| ()),
            Err(message) => retry_async_when(&retry, StoreError::is_transient, || {
                shared.store.fail(job_id, worker, message)
            })
            .await
            .into_result()
            .map(|_| ()),
        };

        match written {
            Ok(()) => {
                if let Ok(results) = result {
                    logger.log_completion(&format!("{} results", results.len()));
                }
            }
            Err(StoreError::NotOwner { .. }) => {
                logger.log_warning("claim was lost before the job finished; leaving it to its new owner");
            }
            Err(e) => logger.log_warning(&format!("failed to record final status: {e}")),
        }
    }

    /// Wait for all in-flight jobs to complete.
    async fn wait_for_jobs(&self) {
        loop {
            if self.jobs_in_flight() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

fn in_flight(semaphore: &Semaphore, max_jobs: usize) -> usize {
    max_jobs.saturating_sub(semaphore.available_permits())
}

/// Refresh `updated_at` until aborted or the claim is lost.
fn spawn_heartbeat(store: Arc<dyn JobStore>, job_id: JobId, worker: String, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        let mut failures = FailureTracker::new(3);

        loop {
            ticker.tick().await;
            match store.heartbeat(&job_id, &worker).await {
                Ok(()) => failures.record_success(),
                Err(StoreError::NotOwner { .. } | StoreError::NotFound(_)) => {
                    warn!(job_id = %job_id, "Lost claim on job, stopping heartbeat");
                    break;
                }
                Err(e) => {
                    if failures.record_failure() {
                        warn!(job_id = %job_id, "Heartbeat failed: {}", e);
                    }
                }
            }
        }
    })
}
