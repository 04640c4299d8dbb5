//! Job definitions.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{ModelError, ModelResult};
use crate::payload::{KeyingPayload, StitchPayload};
use crate::result::ResultRef;
use crate::status::JobStatus;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type of job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Chroma key plus effects plus encode
    Keying,
    Animation,
    /// Clips joined end to end
    VideoStitching,
    ImageGeneration,
    /// Parent of clip jobs whose results are stitched into one loop
    BoomerangAutomation,
}

impl JobType {
    pub const ALL: [JobType; 5] = [
        JobType::Keying,
        JobType::Animation,
        JobType::VideoStitching,
        JobType::ImageGeneration,
        JobType::BoomerangAutomation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Keying => "keying",
            JobType::Animation => "animation",
            JobType::VideoStitching => "video_stitching",
            JobType::ImageGeneration => "image_generation",
            JobType::BoomerangAutomation => "boomerang_automation",
        }
    }

    /// Priority assumed when a submission does not name one.
    pub fn default_priority(&self) -> Priority {
        match self {
            JobType::Keying => Priority::High,
            _ => Priority::Normal,
        }
    }

    /// Keying jobs are served from their own lane, ordered by priority.
    pub fn uses_priority_lane(&self) -> bool {
        matches!(self, JobType::Keying)
    }

    /// Parent jobs wait in the queue while their children run and are never
    /// handed to a handler; they finish when their children do.
    pub fn is_aggregate(&self) -> bool {
        matches!(self, JobType::BoomerangAutomation)
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ModelError::UnknownJobType(s.to_string()))
    }
}

/// Priority class. Orders only within the keying lane.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Normal,
    High,
}

impl Priority {
    /// Smaller ranks are served first.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
        }
    }
}

/// A submission, before the store assigns an id.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NewJob {
    pub job_type: JobType,
    pub payload: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<JobId>,
}

impl NewJob {
    pub fn new(job_type: JobType, payload: serde_json::Value) -> Self {
        Self {
            job_type,
            payload,
            priority: None,
            parent_id: None,
        }
    }

    /// Keying submission from a typed payload.
    pub fn keying(payload: &KeyingPayload) -> ModelResult<Self> {
        Ok(Self::new(JobType::Keying, payload.to_value()?))
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_parent(mut self, parent_id: JobId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Reject malformed submissions. Keying and stitching payloads are parsed
    /// in full; other types only need a JSON object.
    pub fn validate(&self) -> ModelResult<()> {
        match self.job_type {
            JobType::Keying => KeyingPayload::from_value(&self.payload).map(|_| ()),
            JobType::VideoStitching => StitchPayload::from_value(&self.payload).map(|_| ()),
            _ if self.payload.is_object() => Ok(()),
            other => Err(ModelError::validation(format!("{other} payload must be a JSON object"))),
        }
    }

    /// Validate and materialize as a freshly queued job.
    pub fn into_job(self) -> ModelResult<Job> {
        self.validate()?;
        let now = Utc::now();
        Ok(Job {
            id: JobId::new(),
            priority: self.priority.unwrap_or_else(|| self.job_type.default_priority()),
            job_type: self.job_type,
            status: JobStatus::Queued,
            payload: self.payload,
            results: Vec::new(),
            error_message: None,
            parent_id: self.parent_id,
            claimed_by: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        })
    }
}

/// A job owned by the job store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    pub id: JobId,

    #[serde(rename = "type")]
    pub job_type: JobType,

    #[serde(default)]
    pub status: JobStatus,

    pub payload: serde_json::Value,

    #[serde(default)]
    pub priority: Priority,

    /// Named result references (empty until completed)
    #[serde(default, rename = "result_reference")]
    pub results: Vec<ResultRef>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<JobId>,

    /// Worker holding the claim while in flight
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,

    /// Number of times a worker has claimed this job
    #[serde(default)]
    pub attempts: u32,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// What a status poll returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StatusView {
    pub status: JobStatus,
    pub results: Vec<ResultRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Job {
    pub fn status_view(&self) -> StatusView {
        StatusView {
            status: self.status,
            results: self.results.clone(),
            error_message: self.error_message.clone(),
        }
    }

    /// Parse the keying payload of a keying job.
    pub fn keying_payload(&self) -> ModelResult<KeyingPayload> {
        if self.job_type != JobType::Keying {
            return Err(ModelError::validation(format!(
                "job {} is a {} job, not keying",
                self.id, self.job_type
            )));
        }
        KeyingPayload::from_value(&self.payload)
    }

    pub fn stitch_payload(&self) -> ModelResult<StitchPayload> {
        if self.job_type != JobType::VideoStitching {
            return Err(ModelError::validation(format!(
                "job {} is a {} job, not video_stitching",
                self.id, self.job_type
            )));
        }
        StitchPayload::from_value(&self.payload)
    }

    /// Whether `updated_at` is older than `threshold` at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        self.status.is_in_flight() && now - self.updated_at >= threshold
    }
}
