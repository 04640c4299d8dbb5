//! Parent jobs that finish when their children do.
//!
//! A boomerang parent waits in the queue while its clip children run. Once
//! every clip has completed, a stitching child is queued with the clips'
//! results in submission order; when that completes, the parent completes with
//! the stitched result. The first failed child fails the parent.

use std::sync::Arc;
use tracing::{debug, info, warn};

use matte_models::{Job, JobId, JobStatus, JobType, NewJob, ResultRef, StitchPayload};
use matte_store::{ClaimOutcome, JobFilter, JobStore};

use crate::error::WorkerResult;

/// Clips a boomerang needs before it can be stitched.
const MIN_CLIPS: usize = 2;

/// Where a parent job stands after a check.
#[derive(Debug, Clone, PartialEq)]
pub enum ParentProgress {
    /// Children still running.
    Waiting { done: usize, total: usize },
    /// Every clip completed; the stitching child was queued.
    StitchQueued(JobId),
    Completed(Vec<ResultRef>),
    Failed(String),
    /// Not a waiting parent, or another worker settled it first.
    Skipped,
}

/// Moves parent jobs forward from the state of their children.
#[derive(Clone)]
pub struct ParentAggregator {
    store: Arc<dyn JobStore>,
    worker_id: String,
}

impl ParentAggregator {
    pub fn new(store: Arc<dyn JobStore>, worker_id: impl Into<String>) -> Self {
        Self {
            store,
            worker_id: worker_id.into(),
        }
    }

    /// Check every queued parent, returning those that changed.
    pub async fn aggregate_all(&self) -> WorkerResult<Vec<(JobId, ParentProgress)>> {
        let mut changed = Vec::new();
        for job_type in JobType::ALL.into_iter().filter(JobType::is_aggregate) {
            let parents = self
                .store
                .list(&JobFilter::status(JobStatus::Queued).with_type(job_type))
                .await?;
            for parent in parents {
                match self.aggregate(&parent.id).await? {
                    ParentProgress::Waiting { .. } | ParentProgress::Skipped => {}
                    progress => changed.push((parent.id, progress)),
                }
            }
        }
        Ok(changed)
    }

    /// Check one parent.
    pub async fn aggregate(&self, parent_id: &JobId) -> WorkerResult<ParentProgress> {
        let parent = self.store.get(parent_id).await?;
        if !parent.job_type.is_aggregate() || parent.status != JobStatus::Queued {
            return Ok(ParentProgress::Skipped);
        }

        let children = self.store.children(parent_id).await?;
        let failed: Vec<String> = children
            .iter()
            .filter(|c| c.status == JobStatus::Failed)
            .map(|c| {
                format!(
                    "child job {} failed: {}",
                    c.id,
                    c.error_message.as_deref().unwrap_or("no error recorded")
                )
            })
            .collect();
        if !failed.is_empty() {
            return self.settle(&parent, Err(failed.join("\n"))).await;
        }

        let (stitches, clips): (Vec<&Job>, Vec<&Job>) = children
            .iter()
            .partition(|c| c.job_type == JobType::VideoStitching);
        if let Some(stitch) = stitches.iter().find(|s| s.status == JobStatus::Completed) {
            return self.settle(&parent, Ok(stitch.results.clone())).await;
        }

        let done = children.iter().filter(|c| c.status == JobStatus::Completed).count();
        if !stitches.is_empty() || clips.len() < MIN_CLIPS || done < clips.len() {
            debug!(job_id = %parent_id, done, total = children.len(), "Parent still waiting");
            return Ok(ParentProgress::Waiting {
                done,
                total: children.len(),
            });
        }

        let mut sources = Vec::with_capacity(clips.len());
        for clip in &clips {
            match clip.results.first() {
                Some(result) => sources.push(result.location.clone()),
                None => {
                    let message = format!("child job {} completed without a result", clip.id);
                    return self.settle(&parent, Err(message)).await;
                }
            }
        }

        let stitch = NewJob::new(JobType::VideoStitching, StitchPayload::new(sources).to_value()?)
            .with_priority(parent.priority)
            .with_parent(parent.id.clone());
        let stitch = self.store.submit(stitch).await?;
        info!(job_id = %parent_id, stitch_id = %stitch.id, clips = clips.len(), "Queued stitching for parent");
        Ok(ParentProgress::StitchQueued(stitch.id))
    }

    /// Claim the parent and write its final status. Losing the claim means
    /// another worker is settling it.
    async fn settle(&self, parent: &Job, result: Result<Vec<ResultRef>, String>) -> WorkerResult<ParentProgress> {
        let worker = self.worker_id.as_str();
        match self.store.claim(&parent.id, worker).await? {
            ClaimOutcome::Claimed(_) => {}
            other => {
                debug!(job_id = %parent.id, ?other, "Parent settled elsewhere");
                return Ok(ParentProgress::Skipped);
            }
        }
        self.store.begin_processing(&parent.id, worker).await?;

        match result {
            Ok(results) => {
                self.store.complete(&parent.id, worker, results.clone()).await?;
                info!(job_id = %parent.id, "Parent job completed");
                Ok(ParentProgress::Completed(results))
            }
            Err(message) => {
                self.store.fail(&parent.id, worker, &message).await?;
                warn!(job_id = %parent.id, "Parent job failed: {}", message);
                Ok(ParentProgress::Failed(message))
            }
        }
    }
}
