//! Durable job registry and queue
//!
//! One JSON file per job under the state directory. The in-memory map is the
//! fast path for status queries; the files make queued work and terminal
//! results survive a restart. Queued jobs found on disk at startup are
//! re-enqueued. A job found `started` at startup belongs to a worker that no
//! longer exists; it is reported as-is and left for the operator, since no
//! heartbeat exists to prove the worker is gone.

use crate::error::{Error, Result};
use crate::job::{JobRecord, JobState, JobStatus};
use chrono::Utc;
use shelf_cache::{ActiveReferences, JobProbe};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Configuration for opening a registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Directory holding one JSON file per job
    pub state_dir: PathBuf,
    /// How long a terminal job remains queryable, measured from completion.
    /// Zero means records never expire.
    pub job_ttl: Duration,
}

/// Receiving end of the job queue, consumed by the worker pool
pub struct JobQueue {
    pub(crate) rx: mpsc::UnboundedReceiver<String>,
}

/// Job registry backed by a state directory
pub struct JobRegistry {
    jobs_dir: PathBuf,
    job_ttl: Duration,
    jobs: RwLock<HashMap<String, JobRecord>>,
    tokens: Mutex<HashMap<String, CancellationToken>>,
    tx: mpsc::UnboundedSender<String>,
    /// Set when job files on disk could not be read at startup. While
    /// degraded, the active-reference set is reported as unknown so eviction
    /// skips its pass rather than delete files an unreadable job may own.
    degraded: bool,
}

impl JobRegistry {
    /// Open (or create) a registry rooted at the configured state directory.
    ///
    /// Returns the registry together with the queue receiver. Queued jobs
    /// found on disk are re-enqueued in creation order.
    pub fn open(config: RegistryConfig) -> Result<(Arc<Self>, JobQueue)> {
        let jobs_dir = config.state_dir.join("jobs");
        fs::create_dir_all(&jobs_dir)
            .map_err(|e| Error::io(e, &jobs_dir, "creating job state directory"))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut jobs = HashMap::new();
        let mut unreadable = 0usize;
        let mut queued: Vec<(chrono::DateTime<Utc>, String)> = Vec::new();

        let entries = fs::read_dir(&jobs_dir)
            .map_err(|e| Error::io(e, &jobs_dir, "listing job state directory"))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(e, &jobs_dir, "listing job state directory"))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_record(&path) {
                Ok(record) => {
                    if record.state == JobState::Queued {
                        queued.push((record.created_at, record.id.clone()));
                    }
                    jobs.insert(record.id.clone(), record);
                }
                Err(e) => {
                    warn!(path = %path.display(), "Skipping unreadable job record: {e}");
                    unreadable += 1;
                }
            }
        }

        queued.sort();
        for (_, id) in &queued {
            // Receiver is alive here, send cannot fail.
            let _ = tx.send(id.clone());
        }
        if !queued.is_empty() {
            debug!(count = queued.len(), "Re-enqueued queued jobs from disk");
        }

        let registry = Arc::new(Self {
            jobs_dir,
            job_ttl: config.job_ttl,
            jobs: RwLock::new(jobs),
            tokens: Mutex::new(HashMap::new()),
            tx,
            degraded: unreadable > 0,
        });
        Ok((registry, JobQueue { rx }))
    }

    /// Submit a new job, returning its id.
    ///
    /// The record is persisted before the id is enqueued, so a crash between
    /// the two leaves a queued record that the next startup re-enqueues.
    pub fn submit(&self, request: &str) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let record = JobRecord::new(id.clone(), request.to_string());
        self.persist(&record)?;
        self.write_jobs().insert(id.clone(), record);
        self.tx.send(id.clone()).map_err(|_| Error::QueueClosed)?;
        debug!(job_id = %id, request, "Job submitted");
        Ok(id)
    }

    /// Current status of a job, or `None` if unknown or expired
    pub fn status(&self, job_id: &str) -> Option<JobStatus> {
        let jobs = self.read_jobs();
        let record = jobs.get(job_id)?;
        if self.is_expired(record) {
            return None;
        }
        Some(JobStatus::from(record))
    }

    /// Artifact paths of a finished job. `None` means unknown, expired, or
    /// not (yet) finished; callers distinguish via [`Self::status`].
    pub fn result(&self, job_id: &str) -> Option<Vec<PathBuf>> {
        let jobs = self.read_jobs();
        let record = jobs.get(job_id)?;
        if self.is_expired(record) || record.state != JobState::Finished {
            return None;
        }
        record.result.clone()
    }

    /// Request cancellation of a job.
    ///
    /// A queued job transitions to `cancelled` immediately and never runs. A
    /// started job has its cancellation token triggered; the in-flight fetch
    /// may still complete and its artifacts may still land, which is an
    /// accepted race. Returns whether any action was taken.
    pub fn cancel(&self, job_id: &str) -> bool {
        let mut jobs = self.write_jobs();
        let Some(record) = jobs.get_mut(job_id) else {
            return false;
        };
        match record.state {
            JobState::Queued => {
                record.state = JobState::Cancelled;
                record.finished_at = Some(Utc::now());
                self.persist_or_warn(record);
                debug!(job_id, "Cancelled queued job");
                true
            }
            JobState::Started => {
                if let Some(token) = self.lock_tokens().get(job_id) {
                    token.cancel();
                    debug!(job_id, "Signalled cancellation to running job");
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    /// All known, unexpired jobs, newest first
    pub fn list_jobs(&self) -> Vec<JobStatus> {
        let jobs = self.read_jobs();
        let mut out: Vec<JobStatus> = jobs
            .values()
            .filter(|r| !self.is_expired(r))
            .map(JobStatus::from)
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    /// Drop expired terminal jobs from memory and disk, returning the count
    pub fn purge_expired(&self) -> usize {
        let expired: Vec<String> = {
            let jobs = self.read_jobs();
            jobs.values()
                .filter(|r| self.is_expired(r))
                .map(|r| r.id.clone())
                .collect()
        };
        let mut removed = 0;
        for id in expired {
            self.write_jobs().remove(&id);
            self.lock_tokens().remove(&id);
            let path = self.record_path(&id);
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => removed += 1,
                Err(e) => warn!(job_id = %id, "Failed to remove expired job record: {e}"),
            }
        }
        if removed > 0 {
            debug!(removed, "Purged expired job records");
        }
        removed
    }

    // Worker-side transitions. At most one worker owns a job, so these are
    // never called concurrently for the same id.

    /// Claim a queued job, transitioning it to `started`. Returns the request
    /// to execute, or `None` if the job is no longer queued.
    pub(crate) fn begin(&self, job_id: &str) -> Option<String> {
        // Another process may have cancelled a queued job on disk; the disk
        // copy wins before we claim it.
        if let Ok(disk) = read_record(&self.record_path(job_id)) {
            if disk.state == JobState::Cancelled {
                self.write_jobs().insert(job_id.to_string(), disk);
                return None;
            }
        }
        let mut jobs = self.write_jobs();
        let record = jobs.get_mut(job_id)?;
        if record.state != JobState::Queued {
            debug!(job_id, state = %record.state, "Skipping job no longer queued");
            return None;
        }
        record.state = JobState::Started;
        record.started_at = Some(Utc::now());
        self.lock_tokens()
            .insert(job_id.to_string(), CancellationToken::new());
        self.persist_or_warn(record);
        Some(record.request.clone())
    }

    /// Cancellation token for a started job
    pub(crate) fn cancel_token(&self, job_id: &str) -> CancellationToken {
        self.lock_tokens()
            .get(job_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Record artifacts a running job has produced so far, keeping them
    /// visible to the active-reference set before the job finishes
    pub(crate) fn record_pending(&self, job_id: &str, paths: &[PathBuf]) {
        let mut jobs = self.write_jobs();
        if let Some(record) = jobs.get_mut(job_id) {
            record.pending_artifacts = paths.to_vec();
            self.persist_or_warn(record);
        }
    }

    /// Attach a progress annotation to a running job
    pub(crate) fn annotate(&self, job_id: &str, key: &str, value: &str) {
        let mut jobs = self.write_jobs();
        if let Some(record) = jobs.get_mut(job_id) {
            record.meta.insert(key.to_string(), value.to_string());
            self.persist_or_warn(record);
        }
    }

    /// Transition a started job to `finished` with its artifact list
    pub(crate) fn finish(&self, job_id: &str, artifacts: Vec<PathBuf>) {
        self.complete(job_id, |record| {
            record.state = JobState::Finished;
            record.result = Some(artifacts);
        });
    }

    /// Transition a started job to `failed`, capturing the diagnostic verbatim
    pub(crate) fn fail(&self, job_id: &str, error: String) {
        self.complete(job_id, |record| {
            record.state = JobState::Failed;
            record.error = Some(error);
        });
    }

    /// Transition a started job to `cancelled`
    pub(crate) fn mark_cancelled(&self, job_id: &str) {
        self.complete(job_id, |record| {
            record.state = JobState::Cancelled;
        });
    }

    fn complete(&self, job_id: &str, apply: impl FnOnce(&mut JobRecord)) {
        let mut jobs = self.write_jobs();
        let Some(record) = jobs.get_mut(job_id) else {
            return;
        };
        if record.state.is_terminal() {
            return;
        }
        apply(record);
        record.pending_artifacts.clear();
        record.finished_at = Some(Utc::now());
        self.persist_or_warn(record);
        drop(jobs);
        self.lock_tokens().remove(job_id);
    }

    fn is_expired(&self, record: &JobRecord) -> bool {
        if self.job_ttl.is_zero() || !record.state.is_terminal() {
            return false;
        }
        let Some(finished_at) = record.finished_at else {
            return false;
        };
        let age = Utc::now().signed_duration_since(finished_at);
        age.to_std().is_ok_and(|age| age > self.job_ttl)
    }

    fn record_path(&self, job_id: &str) -> PathBuf {
        self.jobs_dir.join(format!("{job_id}.json"))
    }

    fn persist(&self, record: &JobRecord) -> Result<()> {
        let path = self.record_path(&record.id);
        let bytes = serde_json::to_vec_pretty(record)
            .map_err(|e| Error::serialization(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes).map_err(|e| Error::io(e, &tmp, "writing job record"))?;
        fs::rename(&tmp, &path).map_err(|e| Error::io(e, &path, "replacing job record"))?;
        Ok(())
    }

    fn persist_or_warn(&self, record: &JobRecord) {
        if let Err(e) = self.persist(record) {
            warn!(job_id = %record.id, "Failed to persist job record: {e}");
        }
    }

    fn read_jobs(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, JobRecord>> {
        self.jobs.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_jobs(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, JobRecord>> {
        self.jobs.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_tokens(&self) -> std::sync::MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.tokens.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl ActiveReferences for JobRegistry {
    /// Every artifact path owned by a non-terminal job. Reported as unknown
    /// while the registry is degraded, which makes eviction skip its pass.
    fn active_artifact_paths(&self) -> Option<HashSet<PathBuf>> {
        if self.degraded {
            return None;
        }
        let jobs = self.read_jobs();
        let mut active = HashSet::new();
        for record in jobs.values() {
            if record.state.is_terminal() {
                continue;
            }
            active.extend(record.pending_artifacts.iter().cloned());
            if let Some(result) = &record.result {
                active.extend(result.iter().cloned());
            }
        }
        Some(active)
    }
}

impl JobProbe for JobRegistry {
    /// Unknown jobs count as terminal, matching the expiry policy: an absent
    /// record means the job completed long enough ago to be purged.
    fn is_terminal(&self, job_id: &str) -> bool {
        let jobs = self.read_jobs();
        match jobs.get(job_id) {
            Some(record) => record.state.is_terminal() || self.is_expired(record),
            None => true,
        }
    }
}

fn read_record(path: &Path) -> Result<JobRecord> {
    let bytes = fs::read(path).map_err(|e| Error::io(e, path, "reading job record"))?;
    serde_json::from_slice(&bytes).map_err(|e| Error::serialization(e.to_string()))
}
