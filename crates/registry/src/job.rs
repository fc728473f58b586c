//! Job lifecycle types
//!
//! A job moves through a closed set of states. `Queued`, `Started` and the
//! three terminal states (`Finished`, `Failed`, `Cancelled`) are the only
//! values ever persisted; unknown states cannot round-trip through the
//! on-disk records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Accepted and waiting for a worker
    Queued,
    /// Claimed by a worker, fetch in progress
    Started,
    /// Completed successfully, result available
    Finished,
    /// Completed with an error
    Failed,
    /// Cancelled before or during execution
    Cancelled,
}

impl JobState {
    /// Whether this state admits no further transitions
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Queued => "queued",
            Self::Started => "started",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Durable record of a single job
///
/// Persisted as pretty-printed JSON under the registry state directory, one
/// file per job. The in-memory copy is authoritative while the owning process
/// runs; the file exists so queued work and terminal results survive restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique job identifier
    pub id: String,
    /// Current lifecycle state
    pub state: JobState,
    /// The request string the job was submitted with
    pub request: String,
    /// Artifact paths produced by a finished job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Vec<PathBuf>>,
    /// Error message of a failed job, verbatim from the fetch tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Artifact paths a running job has produced so far
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_artifacts: Vec<PathBuf>,
    /// Free-form progress annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
    /// When the job was submitted
    pub created_at: DateTime<Utc>,
    /// When a worker claimed the job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub(crate) fn new(id: String, request: String) -> Self {
        Self {
            id,
            state: JobState::Queued,
            request,
            result: None,
            error: None,
            pending_artifacts: Vec::new(),
            meta: BTreeMap::new(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

/// Snapshot of a job exposed to callers
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    /// Unique job identifier
    pub id: String,
    /// Current lifecycle state
    pub state: JobState,
    /// The request string the job was submitted with
    pub request: String,
    /// Error message, present for failed jobs
    pub error: Option<String>,
    /// Free-form progress annotations
    pub meta: BTreeMap<String, String>,
    /// When the job was submitted
    pub created_at: DateTime<Utc>,
    /// When the job reached a terminal state
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&JobRecord> for JobStatus {
    fn from(record: &JobRecord) -> Self {
        Self {
            id: record.id.clone(),
            state: record.state,
            request: record.request.clone(),
            error: record.error.clone(),
            meta: record.meta.clone(),
            created_at: record.created_at,
            finished_at: record.finished_at,
        }
    }
}
