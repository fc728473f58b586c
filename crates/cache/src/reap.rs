//! Temp workspace reaping
//!
//! Every job gets a scratch directory named `job-<id>` under the temp
//! root. Once the owning job reaches a terminal state its scratch
//! directory is dead weight and is removed here. Directories that do not
//! follow the naming convention are left alone.

use crate::Result;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Directory name prefix marking a job-owned scratch directory
pub const WORKSPACE_PREFIX: &str = "job-";

/// Lookup of job termination, answered by the job registry.
///
/// An unknown id answers `true`: a job whose registry entry has expired is
/// terminal for cleanup purposes.
pub trait JobProbe: Send + Sync {
    /// True when the job is finished, failed, cancelled, or unknown
    fn is_terminal(&self, job_id: &str) -> bool;
}

/// Build the scratch directory name for a job id
#[must_use]
pub fn workspace_dir_name(job_id: &str) -> String {
    format!("{WORKSPACE_PREFIX}{job_id}")
}

/// Remove scratch directories whose owning job has terminated.
///
/// Returns the number of directories removed. Errors on individual
/// directories are logged and skipped; a missing temp root reaps nothing.
pub fn reap(temp_root: &Path, jobs: &dyn JobProbe) -> Result<usize> {
    let mut removed = 0;
    let entries = match fs::read_dir(temp_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(crate::Error::io(e, temp_root, "read_dir")),
    };

    for entry in entries {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(job_id) = name
            .to_str()
            .and_then(|n| n.strip_prefix(WORKSPACE_PREFIX))
            .filter(|id| !id.is_empty())
        else {
            continue;
        };
        if !jobs.is_terminal(job_id) {
            debug!(job_id, "Job still active, keeping workspace");
            continue;
        }
        match fs::remove_dir_all(&path) {
            Ok(()) => {
                debug!(job_id, path = %path.display(), "Reaped job workspace");
                removed += 1;
            }
            Err(e) => {
                warn!(path = %path.display(), "Could not reap workspace: {e}");
            }
        }
    }

    Ok(removed)
}
