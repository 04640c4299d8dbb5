//! Redis-backed job store.
//!
//! Layout under the configured prefix:
//!
//! ```text
//! {p}:job:{id}          hash   definition JSON + mutable run fields
//! {p}:jobs              zset   every job, scored by submission order
//! {p}:lane:{type}       zset   queued ids per job type
//! {p}:inflight          set    ids in pending_process/processing
//! {p}:children:{parent} set    child ids
//! {p}:seq               string monotonically increasing submission counter
//! ```
//!
//! Status changes run as Lua scripts so the check and the write are one step.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Script};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use matte_models::{Job, JobId, JobStatus, JobType, NewJob, Priority, ResultRef, TransitionCause};

use crate::error::{StoreError, StoreResult};
use crate::store::{ClaimOutcome, JobFilter, JobStore, StoreConfig};

/// Separates priority classes inside the keying lane.
const PRIORITY_STRIDE: f64 = 1e12;

const CLAIM_SCRIPT: &str = r#"
local status = redis.call('HGET', KEYS[1], 'status')
if not status then
  redis.call('ZREM', KEYS[2], ARGV[1])
  return {'not_found', ''}
end
if status ~= 'queued' then
  redis.call('ZREM', KEYS[2], ARGV[1])
  return {'taken', status}
end
redis.call('HSET', KEYS[1], 'status', 'pending_process', 'claimed_by', ARGV[2], 'updated_at', ARGV[3])
redis.call('HINCRBY', KEYS[1], 'attempts', 1)
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('SADD', KEYS[3], ARGV[1])
local reply = {'ok', status}
local fields = redis.call('HGETALL', KEYS[1])
for i = 1, #fields do reply[#reply + 1] = fields[i] end
return reply
"#;

const TRANSITION_SCRIPT: &str = r#"
local status = redis.call('HGET', KEYS[1], 'status')
if not status then return {'not_found', ''} end
if redis.call('HGET', KEYS[1], 'claimed_by') ~= ARGV[2] then return {'not_owner', status} end
local allowed = false
for s in string.gmatch(ARGV[3], '[^,]+') do
  if s == status then allowed = true end
end
if not allowed then return {'invalid', status} end
if ARGV[4] ~= '' then redis.call('HSET', KEYS[1], 'status', ARGV[4]) end
redis.call('HSET', KEYS[1], 'updated_at', ARGV[5])
for i = 7, #ARGV, 2 do
  redis.call('HSET', KEYS[1], ARGV[i], ARGV[i + 1])
end
if ARGV[6] == '1' then redis.call('SREM', KEYS[2], ARGV[1]) end
return {'ok', status}
"#;

const REQUEUE_SCRIPT: &str = r#"
local status = redis.call('HGET', KEYS[1], 'status')
if not status then return {'not_found', ''} end
local allowed = false
for s in string.gmatch(ARGV[2], '[^,]+') do
  if s == status then allowed = true end
end
if not allowed then return {'invalid', status} end
if ARGV[4] ~= '' then
  local updated = tonumber(redis.call('HGET', KEYS[1], 'updated_at') or '0')
  if updated > tonumber(ARGV[4]) then return {'fresh', status} end
end
local seq = redis.call('INCR', KEYS[4])
redis.call('HSET', KEYS[1], 'status', 'queued', 'claimed_by', '', 'error_message', '',
  'results', '[]', 'started_at', '', 'completed_at', '', 'updated_at', ARGV[3])
redis.call('ZADD', KEYS[2], tonumber(ARGV[5]) + seq, ARGV[1])
redis.call('SREM', KEYS[3], ARGV[1])
return {'ok', status}
"#;

const DISCARD_SCRIPT: &str = r#"
local status = redis.call('HGET', KEYS[1], 'status')
if not status then return {'not_found', ''} end
if status ~= 'completed' and status ~= 'failed' then return {'in_flight', status} end
redis.call('DEL', KEYS[1])
redis.call('ZREM', KEYS[2], ARGV[1])
return {'ok', status}
"#;

/// Immutable part of a job, stored once as JSON.
#[derive(Debug, Serialize, Deserialize)]
struct StoredDefinition {
    id: JobId,
    #[serde(rename = "type")]
    job_type: JobType,
    payload: serde_json::Value,
    priority: Priority,
    parent_id: Option<JobId>,
    created_at: DateTime<Utc>,
}

struct Scripts {
    claim: Script,
    transition: Script,
    requeue: Script,
    discard: Script,
}

/// Job store shared between worker processes through Redis.
pub struct RedisJobStore {
    client: redis::Client,
    config: StoreConfig,
    scripts: Scripts,
}

/// Script reply: outcome tag, the status the job had before the call, and
/// for a claim the job hash as it stands afterwards.
struct Reply {
    tag: String,
    previous: Option<JobStatus>,
    fields: HashMap<String, String>,
}

impl Reply {
    fn parse(raw: Vec<String>) -> Self {
        let mut parts = raw.into_iter();
        let tag = parts.next().unwrap_or_default();
        let previous = parts.next().and_then(|s| s.parse().ok());
        let mut fields = HashMap::new();
        while let (Some(field), Some(value)) = (parts.next(), parts.next()) {
            fields.insert(field, value);
        }
        Self { tag, previous, fields }
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn parse_millis(raw: Option<&String>) -> Option<DateTime<Utc>> {
    raw.filter(|s| !s.is_empty())
        .and_then(|s| s.parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_millis)
}

fn none_if_empty(raw: Option<&String>) -> Option<String> {
    raw.filter(|s| !s.is_empty()).cloned()
}

/// Statuses from which `next` is reachable for `cause`, comma separated.
fn sources_of(next: JobStatus, cause: TransitionCause) -> String {
    JobStatus::ALL
        .into_iter()
        .filter(|s| s.can_transition_to(next, cause))
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

fn lane_base(job_type: JobType, priority: Priority) -> f64 {
    if job_type.uses_priority_lane() {
        f64::from(priority.rank()) * PRIORITY_STRIDE
    } else {
        0.0
    }
}

fn decode_job(id: &str, fields: &HashMap<String, String>) -> StoreResult<Job> {
    let def_raw = fields
        .get("def")
        .ok_or_else(|| StoreError::corrupt(id, "missing definition"))?;
    let def: StoredDefinition = serde_json::from_str(def_raw)?;

    let status = fields
        .get("status")
        .ok_or_else(|| StoreError::corrupt(id, "missing status"))?
        .parse::<JobStatus>()
        .map_err(|e| StoreError::corrupt(id, e.to_string()))?;

    let results: Vec<ResultRef> = match fields.get("results") {
        Some(raw) if !raw.is_empty() => serde_json::from_str(raw)?,
        _ => Vec::new(),
    };

    Ok(Job {
        id: def.id,
        job_type: def.job_type,
        status,
        payload: def.payload,
        priority: def.priority,
        results,
        error_message: none_if_empty(fields.get("error_message")),
        parent_id: def.parent_id,
        claimed_by: none_if_empty(fields.get("claimed_by")),
        attempts: fields.get("attempts").and_then(|s| s.parse().ok()).unwrap_or(0),
        created_at: def.created_at,
        updated_at: parse_millis(fields.get("updated_at")).unwrap_or(def.created_at),
        started_at: parse_millis(fields.get("started_at")),
        completed_at: parse_millis(fields.get("completed_at")),
    })
}

impl RedisJobStore {
    /// Open a client and verify the server answers.
    pub async fn connect(config: StoreConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| StoreError::connection_failed(e.to_string()))?;

        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::connection_failed(e.to_string()))?;
        redis::cmd("PING").query_async::<()>(&mut conn).await?;

        info!(prefix = %config.key_prefix, "Connected to Redis job store");
        Ok(Self {
            client,
            config,
            scripts: Scripts {
                claim: Script::new(CLAIM_SCRIPT),
                transition: Script::new(TRANSITION_SCRIPT),
                requeue: Script::new(REQUEUE_SCRIPT),
                discard: Script::new(DISCARD_SCRIPT),
            },
        })
    }

    async fn conn(&self) -> StoreResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    fn job_key(&self, id: &str) -> String {
        format!("{}:job:{}", self.config.key_prefix, id)
    }

    fn index_key(&self) -> String {
        format!("{}:jobs", self.config.key_prefix)
    }

    fn lane_key(&self, job_type: JobType) -> String {
        format!("{}:lane:{}", self.config.key_prefix, job_type.as_str())
    }

    fn inflight_key(&self) -> String {
        format!("{}:inflight", self.config.key_prefix)
    }

    fn children_key(&self, parent: &JobId) -> String {
        format!("{}:children:{}", self.config.key_prefix, parent)
    }

    fn seq_key(&self) -> String {
        format!("{}:seq", self.config.key_prefix)
    }

    /// Type and priority are immutable, so reading them outside a script is safe.
    async fn routing(&self, id: &JobId) -> StoreResult<Option<(JobType, Priority)>> {
        let mut conn = self.conn().await?;
        let (job_type, priority): (Option<String>, Option<String>) =
            conn.hget(self.job_key(id.as_str()), &["job_type", "priority"]).await?;
        let Some(job_type) = job_type else {
            return Ok(None);
        };
        let job_type = job_type
            .parse::<JobType>()
            .map_err(|e| StoreError::corrupt(id.as_str(), e.to_string()))?;
        let priority = match priority.as_deref() {
            Some("high") => Priority::High,
            _ => Priority::Normal,
        };
        Ok(Some((job_type, priority)))
    }

    async fn claim_in_lane(&self, id: &str, job_type: JobType, worker: &str) -> StoreResult<ClaimOutcome> {
        let mut conn = self.conn().await?;
        let raw: Vec<String> = self
            .scripts
            .claim
            .key(self.job_key(id))
            .key(self.lane_key(job_type))
            .key(self.inflight_key())
            .arg(id)
            .arg(worker)
            .arg(now_millis())
            .invoke_async(&mut conn)
            .await?;

        let reply = Reply::parse(raw);
        match reply.tag.as_str() {
            "ok" => {
                // Decoded from the script reply: a second round trip could be
                // cancelled after the claim landed, stranding the job in flight.
                let job = decode_job(id, &reply.fields)?;
                debug!(job_id = %id, worker, "Job claimed");
                Ok(ClaimOutcome::Claimed(job))
            }
            "taken" => Ok(ClaimOutcome::AlreadyClaimed {
                status: reply.previous.unwrap_or(JobStatus::PendingProcess),
            }),
            _ => Ok(ClaimOutcome::NotFound),
        }
    }

    /// Run an owner-checked transition. `next = None` refreshes without moving.
    async fn transition(
        &self,
        id: &JobId,
        worker: &str,
        next: Option<JobStatus>,
        fields: &[(&str, String)],
    ) -> StoreResult<()> {
        let allowed = match next {
            Some(next) => sources_of(next, TransitionCause::Worker),
            None => [JobStatus::PendingProcess, JobStatus::Processing]
                .map(|s| s.as_str())
                .join(","),
        };
        let leaves_flight = next.is_some_and(|s| !s.is_in_flight());

        let mut conn = self.conn().await?;
        let mut invocation = self.scripts.transition.key(self.job_key(id.as_str()));
        invocation
            .key(self.inflight_key())
            .arg(id.as_str())
            .arg(worker)
            .arg(allowed)
            .arg(next.map(|s| s.as_str()).unwrap_or(""))
            .arg(now_millis())
            .arg(if leaves_flight { "1" } else { "0" });
        for (field, value) in fields {
            invocation.arg(*field).arg(value);
        }
        let raw: Vec<String> = invocation.invoke_async(&mut conn).await?;

        let reply = Reply::parse(raw);
        match (reply.tag.as_str(), next) {
            ("ok", _) => Ok(()),
            ("not_found", _) => Err(StoreError::NotFound(id.clone())),
            ("invalid", Some(to)) => Err(StoreError::InvalidTransition {
                job_id: id.clone(),
                from: reply.previous.unwrap_or_default(),
                to,
            }),
            _ => Err(StoreError::not_owner(id, worker)),
        }
    }

    /// Put a job back on its lane. `stale_before` limits the move to jobs not
    /// updated since that instant.
    async fn requeue(&self, id: &JobId, cause: TransitionCause, stale_before: Option<i64>) -> StoreResult<bool> {
        let Some((job_type, priority)) = self.routing(id).await? else {
            return Err(StoreError::NotFound(id.clone()));
        };

        let mut conn = self.conn().await?;
        let raw: Vec<String> = self
            .scripts
            .requeue
            .key(self.job_key(id.as_str()))
            .key(self.lane_key(job_type))
            .key(self.inflight_key())
            .key(self.seq_key())
            .arg(id.as_str())
            .arg(sources_of(JobStatus::Queued, cause))
            .arg(now_millis())
            .arg(stale_before.map(|t| t.to_string()).unwrap_or_default())
            .arg(lane_base(job_type, priority))
            .invoke_async(&mut conn)
            .await?;

        let reply = Reply::parse(raw);
        match reply.tag.as_str() {
            "ok" => Ok(true),
            "fresh" => Ok(false),
            "not_found" => Err(StoreError::NotFound(id.clone())),
            _ => Err(StoreError::InvalidTransition {
                job_id: id.clone(),
                from: reply.previous.unwrap_or_default(),
                to: JobStatus::Queued,
            }),
        }
    }

    async fn load_many(&self, ids: &[String]) -> StoreResult<Vec<Job>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        for id in ids {
            pipe.hgetall(self.job_key(id));
        }
        let rows: Vec<HashMap<String, String>> = pipe.query_async(&mut conn).await?;

        let mut jobs = Vec::with_capacity(rows.len());
        for (id, fields) in ids.iter().zip(rows) {
            // Discarded between the index read and the fetch.
            if fields.is_empty() {
                continue;
            }
            jobs.push(decode_job(id, &fields)?);
        }
        Ok(jobs)
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn submit(&self, new_job: NewJob) -> StoreResult<Job> {
        let job = new_job.into_job()?;
        let def = StoredDefinition {
            id: job.id.clone(),
            job_type: job.job_type,
            payload: job.payload.clone(),
            priority: job.priority,
            parent_id: job.parent_id.clone(),
            created_at: job.created_at,
        };
        let def = serde_json::to_string(&def)?;
        let priority = match job.priority {
            Priority::High => "high",
            Priority::Normal => "normal",
        };

        let mut conn = self.conn().await?;
        let seq: u64 = conn.incr(self.seq_key(), 1).await?;
        let key = self.job_key(job.id.as_str());

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset_multiple(
                &key,
                &[
                    ("def", def),
                    ("job_type", job.job_type.as_str().to_string()),
                    ("priority", priority.to_string()),
                    ("status", job.status.as_str().to_string()),
                    ("claimed_by", String::new()),
                    ("error_message", String::new()),
                    ("results", "[]".to_string()),
                    ("attempts", "0".to_string()),
                    ("updated_at", job.updated_at.timestamp_millis().to_string()),
                ],
            )
            .ignore()
            .zadd(self.index_key(), job.id.as_str(), seq)
            .ignore()
            .zadd(
                self.lane_key(job.job_type),
                job.id.as_str(),
                lane_base(job.job_type, job.priority) + seq as f64,
            )
            .ignore();
        if let Some(parent) = &job.parent_id {
            pipe.sadd(self.children_key(parent), job.id.as_str()).ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;

        info!(job_id = %job.id, job_type = %job.job_type, "Job submitted");
        Ok(job)
    }

    async fn get(&self, id: &JobId) -> StoreResult<Job> {
        let mut conn = self.conn().await?;
        let fields: HashMap<String, String> = conn.hgetall(self.job_key(id.as_str())).await?;
        if fields.is_empty() {
            return Err(StoreError::NotFound(id.clone()));
        }
        decode_job(id.as_str(), &fields)
    }

    async fn list(&self, filter: &JobFilter) -> StoreResult<Vec<Job>> {
        let mut conn = self.conn().await?;
        let ids: Vec<String> = conn.zrange(self.index_key(), 0, -1).await?;
        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(self
            .load_many(&ids)
            .await?
            .into_iter()
            .filter(|job| filter.matches(job))
            .take(limit)
            .collect())
    }

    async fn children(&self, parent_id: &JobId) -> StoreResult<Vec<Job>> {
        let mut conn = self.conn().await?;
        let ids: Vec<String> = conn.smembers(self.children_key(parent_id)).await?;
        let mut jobs = self.load_many(&ids).await?;
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(jobs)
    }

    async fn claim(&self, id: &JobId, worker: &str) -> StoreResult<ClaimOutcome> {
        match self.routing(id).await? {
            Some((job_type, _)) => self.claim_in_lane(id.as_str(), job_type, worker).await,
            None => Ok(ClaimOutcome::NotFound),
        }
    }

    async fn claim_next(&self, worker: &str, accepted: &[JobType]) -> StoreResult<Option<Job>> {
        let scan = self.config.claim_scan.max(1) as isize;

        if accepted.contains(&JobType::Keying) {
            let lane = self.lane_key(JobType::Keying);
            loop {
                let mut conn = self.conn().await?;
                let ids: Vec<String> = conn.zrange(&lane, 0, scan - 1).await?;
                if ids.is_empty() {
                    break;
                }
                // Losing a race removes the entry, so each pass shrinks the lane.
                for id in ids {
                    if let ClaimOutcome::Claimed(job) = self.claim_in_lane(&id, JobType::Keying, worker).await? {
                        return Ok(Some(job));
                    }
                }
            }
        }

        let others: Vec<JobType> = accepted.iter().copied().filter(|t| !t.uses_priority_lane()).collect();
        loop {
            let mut conn = self.conn().await?;
            let mut oldest: Option<(String, JobType, f64)> = None;
            for job_type in &others {
                let head: Vec<(String, f64)> = conn.zrange_withscores(self.lane_key(*job_type), 0, 0).await?;
                if let Some((id, score)) = head.into_iter().next() {
                    if oldest.as_ref().map_or(true, |(_, _, best)| score < *best) {
                        oldest = Some((id, *job_type, score));
                    }
                }
            }

            let Some((id, job_type, _)) = oldest else {
                return Ok(None);
            };
            if let ClaimOutcome::Claimed(job) = self.claim_in_lane(&id, job_type, worker).await? {
                return Ok(Some(job));
            }
        }
    }

    async fn begin_processing(&self, id: &JobId, worker: &str) -> StoreResult<Job> {
        let now = now_millis().to_string();
        self.transition(id, worker, Some(JobStatus::Processing), &[("started_at", now)])
            .await?;
        self.get(id).await
    }

    async fn heartbeat(&self, id: &JobId, worker: &str) -> StoreResult<()> {
        self.transition(id, worker, None, &[]).await
    }

    async fn complete(&self, id: &JobId, worker: &str, results: Vec<ResultRef>) -> StoreResult<Job> {
        let fields = [
            ("results", serde_json::to_string(&results)?),
            ("claimed_by", String::new()),
            ("completed_at", now_millis().to_string()),
        ];
        self.transition(id, worker, Some(JobStatus::Completed), &fields).await?;
        self.get(id).await
    }

    async fn fail(&self, id: &JobId, worker: &str, error: &str) -> StoreResult<Job> {
        let fields = [
            ("error_message", error.to_string()),
            ("results", "[]".to_string()),
            ("claimed_by", String::new()),
            ("completed_at", now_millis().to_string()),
        ];
        self.transition(id, worker, Some(JobStatus::Failed), &fields).await?;
        self.get(id).await
    }

    async fn retry(&self, id: &JobId) -> StoreResult<Job> {
        self.requeue(id, TransitionCause::Retry, None).await?;
        info!(job_id = %id, "Job requeued for retry");
        self.get(id).await
    }

    async fn discard(&self, id: &JobId) -> StoreResult<()> {
        let parent = self.get(id).await?.parent_id;

        let mut conn = self.conn().await?;
        let raw: Vec<String> = self
            .scripts
            .discard
            .key(self.job_key(id.as_str()))
            .key(self.index_key())
            .arg(id.as_str())
            .invoke_async(&mut conn)
            .await?;

        let reply = Reply::parse(raw);
        match reply.tag.as_str() {
            "ok" => {
                if let Some(parent) = parent {
                    conn.srem::<_, _, ()>(self.children_key(&parent), id.as_str()).await?;
                }
                info!(job_id = %id, "Job discarded");
                Ok(())
            }
            "not_found" => Err(StoreError::NotFound(id.clone())),
            _ => Err(StoreError::InFlight {
                job_id: id.clone(),
                status: reply.previous.unwrap_or_default(),
            }),
        }
    }

    async fn requeue_stale(&self, threshold: Duration) -> StoreResult<Vec<Job>> {
        let threshold_ms = i64::try_from(threshold.as_millis()).unwrap_or(i64::MAX);
        let stale_before = now_millis().saturating_sub(threshold_ms);

        let mut conn = self.conn().await?;
        let ids: Vec<String> = conn.smembers(self.inflight_key()).await?;

        let mut requeued = Vec::new();
        for id in ids {
            let id = JobId::from_string(id);
            match self.requeue(&id, TransitionCause::Sweep, Some(stale_before)).await {
                Ok(true) => requeued.push(self.get(&id).await?),
                Ok(false) => {}
                // Finished or discarded since the set was read.
                Err(StoreError::NotFound(_) | StoreError::InvalidTransition { .. }) => {
                    conn.srem::<_, _, ()>(self.inflight_key(), id.as_str()).await?;
                }
                Err(e) => {
                    warn!(job_id = %id, error = %e, "Failed to requeue stale job");
                    return Err(e);
                }
            }
        }
        if !requeued.is_empty() {
            info!(count = requeued.len(), "Requeued stale jobs");
        }
        Ok(requeued)
    }
}
