//! In-process job store.
//!
//! Every operation takes the table lock for its whole read-check-write, which
//! is what makes claims atomic here.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use matte_models::{Job, JobId, JobStatus, JobType, NewJob, ResultRef, TransitionCause};

use crate::error::{StoreError, StoreResult};
use crate::store::{ClaimOutcome, JobFilter, JobStore};

struct Entry {
    job: Job,
    /// Queue order; refreshed when the job re-enters the queue.
    seq: u64,
    /// Submission order, for listing.
    first_seq: u64,
}

#[derive(Default)]
struct Table {
    jobs: HashMap<JobId, Entry>,
    next_seq: u64,
}

impl Table {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn entry_mut(&mut self, id: &JobId) -> StoreResult<&mut Entry> {
        self.jobs.get_mut(id).ok_or_else(|| StoreError::NotFound(id.clone()))
    }
}

/// Job store held in memory. Used by tests and single-process deployments.
#[derive(Default)]
pub struct MemoryJobStore {
    table: RwLock<Table>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn owned<'a>(entry: &'a mut Entry, id: &JobId, worker: &str) -> StoreResult<&'a mut Job> {
    if entry.job.claimed_by.as_deref() != Some(worker) {
        return Err(StoreError::not_owner(id, worker));
    }
    Ok(&mut entry.job)
}

fn advance(job: &mut Job, next: JobStatus, cause: TransitionCause) -> StoreResult<()> {
    if !job.status.can_transition_to(next, cause) {
        return Err(StoreError::InvalidTransition {
            job_id: job.id.clone(),
            from: job.status,
            to: next,
        });
    }
    job.status = next;
    job.updated_at = Utc::now();
    Ok(())
}

fn clear_run_state(job: &mut Job) {
    job.claimed_by = None;
    job.results.clear();
    job.error_message = None;
    job.started_at = None;
    job.completed_at = None;
}

/// Sort key for `claim_next`: keying lane first, then priority, then age.
fn lane_order(entry: &Entry) -> (u8, u8, u64) {
    if entry.job.job_type.uses_priority_lane() {
        (0, entry.job.priority.rank(), entry.seq)
    } else {
        (1, 0, entry.seq)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn submit(&self, new_job: NewJob) -> StoreResult<Job> {
        let job = new_job.into_job()?;
        let mut table = self.table.write().await;
        let seq = table.next_seq();
        table.jobs.insert(
            job.id.clone(),
            Entry {
                job: job.clone(),
                seq,
                first_seq: seq,
            },
        );
        info!(job_id = %job.id, job_type = %job.job_type, "Job submitted");
        Ok(job)
    }

    async fn get(&self, id: &JobId) -> StoreResult<Job> {
        let table = self.table.read().await;
        table
            .jobs
            .get(id)
            .map(|e| e.job.clone())
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn list(&self, filter: &JobFilter) -> StoreResult<Vec<Job>> {
        let table = self.table.read().await;
        let mut entries: Vec<&Entry> = table.jobs.values().filter(|e| filter.matches(&e.job)).collect();
        // Ties on the clock fall back to submission order.
        entries.sort_by_key(|e| (e.job.created_at, e.first_seq));
        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(entries.into_iter().take(limit).map(|e| e.job.clone()).collect())
    }

    async fn claim(&self, id: &JobId, worker: &str) -> StoreResult<ClaimOutcome> {
        let mut table = self.table.write().await;
        let Some(entry) = table.jobs.get_mut(id) else {
            return Ok(ClaimOutcome::NotFound);
        };
        if entry.job.status != JobStatus::Queued {
            return Ok(ClaimOutcome::AlreadyClaimed {
                status: entry.job.status,
            });
        }
        advance(&mut entry.job, JobStatus::PendingProcess, TransitionCause::Worker)?;
        entry.job.claimed_by = Some(worker.to_string());
        entry.job.attempts += 1;
        debug!(job_id = %id, worker, "Job claimed");
        Ok(ClaimOutcome::Claimed(entry.job.clone()))
    }

    async fn claim_next(&self, worker: &str, accepted: &[JobType]) -> StoreResult<Option<Job>> {
        let mut table = self.table.write().await;
        let next = table
            .jobs
            .values()
            .filter(|e| e.job.status == JobStatus::Queued && accepted.contains(&e.job.job_type))
            .min_by_key(|e| lane_order(e))
            .map(|e| e.job.id.clone());

        let Some(id) = next else {
            return Ok(None);
        };
        let entry = table.entry_mut(&id)?;
        advance(&mut entry.job, JobStatus::PendingProcess, TransitionCause::Worker)?;
        entry.job.claimed_by = Some(worker.to_string());
        entry.job.attempts += 1;
        debug!(job_id = %id, worker, "Job claimed");
        Ok(Some(entry.job.clone()))
    }

    async fn begin_processing(&self, id: &JobId, worker: &str) -> StoreResult<Job> {
        let mut table = self.table.write().await;
        let job = owned(table.entry_mut(id)?, id, worker)?;
        advance(job, JobStatus::Processing, TransitionCause::Worker)?;
        job.started_at = Some(job.updated_at);
        Ok(job.clone())
    }

    async fn heartbeat(&self, id: &JobId, worker: &str) -> StoreResult<()> {
        let mut table = self.table.write().await;
        let job = owned(table.entry_mut(id)?, id, worker)?;
        if !job.status.is_in_flight() {
            return Err(StoreError::not_owner(id, worker));
        }
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn complete(&self, id: &JobId, worker: &str, results: Vec<ResultRef>) -> StoreResult<Job> {
        let mut table = self.table.write().await;
        let job = owned(table.entry_mut(id)?, id, worker)?;
        advance(job, JobStatus::Completed, TransitionCause::Worker)?;
        job.results = results;
        job.claimed_by = None;
        job.completed_at = Some(job.updated_at);
        Ok(job.clone())
    }

    async fn fail(&self, id: &JobId, worker: &str, error: &str) -> StoreResult<Job> {
        let mut table = self.table.write().await;
        let job = owned(table.entry_mut(id)?, id, worker)?;
        advance(job, JobStatus::Failed, TransitionCause::Worker)?;
        job.error_message = Some(error.to_string());
        job.results.clear();
        job.claimed_by = None;
        job.completed_at = Some(job.updated_at);
        Ok(job.clone())
    }

    async fn retry(&self, id: &JobId) -> StoreResult<Job> {
        let mut table = self.table.write().await;
        let seq = table.next_seq();
        let entry = table.entry_mut(id)?;
        advance(&mut entry.job, JobStatus::Queued, TransitionCause::Retry)?;
        clear_run_state(&mut entry.job);
        entry.seq = seq;
        info!(job_id = %id, "Job requeued for retry");
        Ok(entry.job.clone())
    }

    async fn discard(&self, id: &JobId) -> StoreResult<()> {
        let mut table = self.table.write().await;
        let status = table.entry_mut(id)?.job.status;
        if !status.is_terminal() {
            return Err(StoreError::InFlight {
                job_id: id.clone(),
                status,
            });
        }
        table.jobs.remove(id);
        info!(job_id = %id, "Job discarded");
        Ok(())
    }

    async fn requeue_stale(&self, threshold: Duration) -> StoreResult<Vec<Job>> {
        let threshold = chrono::Duration::from_std(threshold).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        let now = Utc::now();
        let mut table = self.table.write().await;

        let stale: Vec<JobId> = table
            .jobs
            .values()
            .filter(|e| e.job.is_stale(now, threshold))
            .map(|e| e.job.id.clone())
            .collect();

        let mut requeued = Vec::with_capacity(stale.len());
        for id in stale {
            let seq = table.next_seq();
            let entry = table.entry_mut(&id)?;
            advance(&mut entry.job, JobStatus::Queued, TransitionCause::Sweep)?;
            clear_run_state(&mut entry.job);
            entry.seq = seq;
            requeued.push(entry.job.clone());
        }
        if !requeued.is_empty() {
            info!(count = requeued.len(), "Requeued stale jobs");
        }
        Ok(requeued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matte_models::{Priority, ResultVariant};
    use serde_json::json;
    use std::sync::Arc;

    fn keying(priority: Priority) -> NewJob {
        NewJob::new(JobType::Keying, json!({"source": "in.mp4"})).with_priority(priority)
    }

    async fn claimed(store: &MemoryJobStore, worker: &str) -> Job {
        let job = store.submit(keying(Priority::High)).await.unwrap();
        store.claim(&job.id, worker).await.unwrap().into_job().unwrap()
    }

    #[tokio::test]
    async fn test_invalid_submission_never_stored() {
        let store = MemoryJobStore::new();
        let err = store
            .submit(NewJob::new(JobType::Keying, json!({"source": ""})))
            .await
            .unwrap_err();
        assert!(err.is_rejection());
        assert!(store.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_single_winner() {
        let store = Arc::new(MemoryJobStore::new());
        let job = store.submit(keying(Priority::High)).await.unwrap();

        let (a, b) = tokio::join!(
            {
                let store = store.clone();
                let id = job.id.clone();
                tokio::spawn(async move { store.claim(&id, "worker-a").await })
            },
            {
                let store = store.clone();
                let id = job.id.clone();
                tokio::spawn(async move { store.claim(&id, "worker-b").await })
            }
        );
        let outcomes = [a.unwrap().unwrap(), b.unwrap().unwrap()];

        let winners = outcomes.iter().filter(|o| matches!(o, ClaimOutcome::Claimed(_))).count();
        assert_eq!(winners, 1);
        assert!(outcomes.iter().any(|o| matches!(
            o,
            ClaimOutcome::AlreadyClaimed {
                status: JobStatus::PendingProcess
            }
        )));
        assert_eq!(store.get(&job.id).await.unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn test_claim_missing() {
        let store = MemoryJobStore::new();
        assert_eq!(store.claim(&JobId::new(), "w").await.unwrap(), ClaimOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_claim_next_order() {
        let store = MemoryJobStore::new();
        let other = store.submit(NewJob::new(JobType::Animation, json!({}))).await.unwrap();
        let normal = store.submit(keying(Priority::Normal)).await.unwrap();
        let high = store.submit(keying(Priority::High)).await.unwrap();
        let generation = store.submit(NewJob::new(JobType::ImageGeneration, json!({}))).await.unwrap();

        let mut order = Vec::new();
        while let Some(job) = store.claim_next("w", &JobType::ALL).await.unwrap() {
            order.push(job.id);
        }
        assert_eq!(order, vec![high.id, normal.id, other.id, generation.id]);
    }

    #[tokio::test]
    async fn test_claim_next_respects_accepted_types() {
        let store = MemoryJobStore::new();
        store.submit(NewJob::new(JobType::Animation, json!({}))).await.unwrap();
        assert!(store.claim_next("w", &[JobType::Keying]).await.unwrap().is_none());

        let job = store.submit(keying(Priority::Normal)).await.unwrap();
        let claimed = store.claim_next("w", &[JobType::Keying]).await.unwrap().unwrap();
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.claimed_by.as_deref(), Some("w"));
    }

    #[tokio::test]
    async fn test_lifecycle_to_completed() {
        let store = MemoryJobStore::new();
        let job = claimed(&store, "w").await;

        let job = store.begin_processing(&job.id, "w").await.unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.started_at.is_some());

        store.heartbeat(&job.id, "w").await.unwrap();
        let results = vec![ResultRef::new(ResultVariant::TransparentVideo, "out.webm")];
        let job = store.complete(&job.id, "w", results.clone()).await.unwrap();

        let view = store.get(&job.id).await.unwrap().status_view();
        assert_eq!(view.status, JobStatus::Completed);
        assert_eq!(view.results, results);
        assert!(view.error_message.is_none());
        assert!(job.claimed_by.is_none());
    }

    #[tokio::test]
    async fn test_only_owner_writes() {
        let store = MemoryJobStore::new();
        let job = claimed(&store, "owner").await;

        let err = store.begin_processing(&job.id, "intruder").await.unwrap_err();
        assert!(matches!(err, StoreError::NotOwner { .. }));
        let err = store.fail(&job.id, "intruder", "boom").await.unwrap_err();
        assert!(matches!(err, StoreError::NotOwner { .. }));
        assert_eq!(store.get(&job.id).await.unwrap().status, JobStatus::PendingProcess);
    }

    #[tokio::test]
    async fn test_complete_requires_processing() {
        let store = MemoryJobStore::new();
        let job = claimed(&store, "w").await;
        let err = store.complete(&job.id, "w", Vec::new()).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition {
                from: JobStatus::PendingProcess,
                to: JobStatus::Completed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_fail_then_retry() {
        let store = MemoryJobStore::new();
        let job = claimed(&store, "w").await;
        store.begin_processing(&job.id, "w").await.unwrap();

        let failed = store.fail(&job.id, "w", "decode failed").await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("decode failed"));

        let retried = store.retry(&job.id).await.unwrap();
        assert_eq!(retried.status, JobStatus::Queued);
        assert!(retried.error_message.is_none());
        assert!(retried.results.is_empty());
        assert!(retried.claimed_by.is_none());

        let again = store.claim_next("w2", &JobType::ALL).await.unwrap().unwrap();
        assert_eq!(again.id, job.id);
        assert_eq!(again.attempts, 2);
    }

    #[tokio::test]
    async fn test_retry_requires_failed() {
        let store = MemoryJobStore::new();
        let job = store.submit(keying(Priority::High)).await.unwrap();
        assert!(matches!(
            store.retry(&job.id).await.unwrap_err(),
            StoreError::InvalidTransition { .. }
        ));
    }

    #[tokio::test]
    async fn test_discard_refuses_in_flight() {
        let store = MemoryJobStore::new();
        let job = claimed(&store, "w").await;

        let err = store.discard(&job.id).await.unwrap_err();
        assert!(matches!(err, StoreError::InFlight { .. }));

        store.fail(&job.id, "w", "boom").await.unwrap();
        store.discard(&job.id).await.unwrap();
        assert!(matches!(store.get(&job.id).await.unwrap_err(), StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_requeue_stale() {
        let store = MemoryJobStore::new();
        let job = claimed(&store, "crashed").await;
        store.begin_processing(&job.id, "crashed").await.unwrap();

        assert!(store.requeue_stale(Duration::from_secs(3600)).await.unwrap().is_empty());

        let requeued = store.requeue_stale(Duration::ZERO).await.unwrap();
        assert_eq!(requeued.len(), 1);
        assert_eq!(requeued[0].status, JobStatus::Queued);
        assert!(requeued[0].claimed_by.is_none());
        assert!(requeued[0].started_at.is_none());

        // The old owner can no longer write.
        let err = store.fail(&job.id, "crashed", "late").await.unwrap_err();
        assert!(matches!(err, StoreError::NotOwner { .. }));
    }

    #[tokio::test]
    async fn test_children_and_list() {
        let store = MemoryJobStore::new();
        let parent = store.submit(NewJob::new(JobType::BoomerangAutomation, json!({}))).await.unwrap();
        let child = store
            .submit(keying(Priority::High).with_parent(parent.id.clone()))
            .await
            .unwrap();

        let children = store.children(&parent.id).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, child.id);

        let queued = store.list(&JobFilter::status(JobStatus::Queued)).await.unwrap();
        assert_eq!(queued.len(), 2);
        let limited = store.list(&JobFilter::default().with_limit(1)).await.unwrap();
        assert_eq!(limited.len(), 1);
    }
}
