//! Job status and the state machine that governs it.
//!
//! ```text
//! queued ──claim──▶ pending_process ──▶ processing ──▶ completed
//!    ▲                    │   │              │  │
//!    │                    │   └──── sweep ───┼──┘ (back to queued)
//!    │                    ▼                  ▼
//!    └────── retry ───── failed ◀────────────┘
//! ```

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ModelError;

/// Job processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a worker
    #[default]
    Queued,
    /// Claimed by a worker that is preparing its workspace
    PendingProcess,
    /// Frames are being processed
    Processing,
    /// Finished with result references
    Completed,
    /// Finished with error text
    Failed,
}

/// Why a transition is being taken. Some edges are only legal for one reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCause {
    /// Normal forward progress driven by the owning worker.
    Worker,
    /// Stale-job sweep returning a crashed job to the queue.
    Sweep,
    /// Explicit user retry of a failed job.
    Retry,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Queued,
        JobStatus::PendingProcess,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    /// Get string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::PendingProcess => "pending_process",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more updates expected without user action).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// A worker holds the job in these states.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, JobStatus::PendingProcess | JobStatus::Processing)
    }

    /// Whether `self → next` is an edge of the state machine for the given cause.
    pub fn can_transition_to(&self, next: JobStatus, cause: TransitionCause) -> bool {
        use JobStatus::*;
        match (self, next, cause) {
            (Queued, PendingProcess, TransitionCause::Worker) => true,
            (PendingProcess, Processing, TransitionCause::Worker) => true,
            (Processing, Completed, TransitionCause::Worker) => true,
            (PendingProcess | Processing, Failed, TransitionCause::Worker) => true,
            (PendingProcess | Processing, Queued, TransitionCause::Sweep) => true,
            (Failed, Queued, TransitionCause::Retry) => true,
            _ => false,
        }
    }

    /// Validate a transition, returning a descriptive error when it is not an edge.
    pub fn transition(self, next: JobStatus, cause: TransitionCause) -> Result<JobStatus, ModelError> {
        if self.can_transition_to(next, cause) {
            Ok(next)
        } else {
            Err(ModelError::InvalidTransition { from: self, to: next })
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ModelError::UnknownStatus(s.to_string()))
    }
}
