//! Background sweep that returns abandoned jobs to the queue.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info, warn};

use matte_models::Job;
use matte_store::JobStore;

use crate::aggregate::ParentAggregator;
use crate::error::WorkerResult;
use crate::metrics;
use crate::workdir::remove_stale;

/// Requeues in-flight jobs whose owner stopped heartbeating, and moves
/// waiting parent jobs forward.
pub struct StaleJobSweeper {
    store: Arc<dyn JobStore>,
    work_root: PathBuf,
    threshold: Duration,
    every: Duration,
    parents: Option<ParentAggregator>,
}

impl StaleJobSweeper {
    pub fn new(store: Arc<dyn JobStore>, work_root: PathBuf, threshold: Duration, every: Duration) -> Self {
        Self {
            store,
            work_root,
            threshold,
            every,
            parents: None,
        }
    }

    /// Also settle parents whose children finished on other workers.
    pub fn with_parents(mut self, parents: ParentAggregator) -> Self {
        self.parents = Some(parents);
        self
    }

    /// Sweep every interval until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting stale job sweeper (interval: {:?}, threshold: {:?})",
            self.every, self.threshold
        );

        let mut ticker = interval(self.every);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        error!("Stale job sweep error: {}", e);
                    }
                    if let Some(parents) = &self.parents {
                        match parents.aggregate_all().await {
                            Ok(changed) if !changed.is_empty() => {
                                info!("Parent sweep complete: {} parents moved on", changed.len());
                            }
                            Ok(_) => {}
                            Err(e) => error!("Parent sweep error: {}", e),
                        }
                    }
                }
            }
        }
    }

    /// Run a single sweep, returning the requeued jobs.
    pub async fn sweep_once(&self) -> WorkerResult<Vec<Job>> {
        let requeued = self.store.requeue_stale(self.threshold).await?;
        if requeued.is_empty() {
            return Ok(requeued);
        }

        for job in &requeued {
            warn!(job_id = %job.id, attempts = job.attempts, "Requeued stale job");
            // Only present when the abandoned run shared this machine.
            if let Err(e) = remove_stale(&self.work_root, &job.id).await {
                warn!(job_id = %job.id, "Failed to remove stale work directory: {}", e);
            }
        }

        metrics::record_requeued(requeued.len());
        info!("Stale job sweep complete: {} requeued", requeued.len());
        Ok(requeued)
    }
}
