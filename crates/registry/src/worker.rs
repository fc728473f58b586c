//! Worker pool executing queued jobs
//!
//! A fixed number of tokio tasks share the queue receiver. Each worker claims
//! one job at a time, runs the fetcher inside the job's scratch workspace,
//! and on success records the produced artifacts in the metadata store,
//! grouped by series directory.

use crate::registry::{JobQueue, JobRegistry};
use shelf_cache::{MetaStore, workspace_dir_name};
use shelf_fetch::Fetcher;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Filesystem roots the workers operate on
#[derive(Debug, Clone)]
pub struct WorkerContext {
    /// Destination directory for finished artifacts
    pub cache_root: PathBuf,
    /// Parent directory for per-job scratch workspaces
    pub temp_root: PathBuf,
}

/// Handle over the spawned worker tasks
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` tasks consuming the queue. A zero count is clamped to
    /// one worker.
    pub fn spawn(
        workers: usize,
        queue: JobQueue,
        registry: Arc<JobRegistry>,
        fetcher: Arc<dyn Fetcher>,
        store: MetaStore,
        ctx: WorkerContext,
    ) -> Self {
        let rx = Arc::new(Mutex::new(queue.rx));
        let handles = (0..workers.max(1))
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let registry = Arc::clone(&registry);
                let fetcher = Arc::clone(&fetcher);
                let store = store.clone();
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    loop {
                        let job_id = { rx.lock().await.recv().await };
                        let Some(job_id) = job_id else {
                            debug!(worker, "Queue closed, worker exiting");
                            break;
                        };
                        run_one(&registry, fetcher.as_ref(), &store, &ctx, &job_id).await;
                    }
                })
            })
            .collect();
        Self { handles }
    }

    /// Abort all worker tasks immediately
    pub fn abort(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }

    /// Wait for all workers to exit after the queue has closed
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn run_one(
    registry: &JobRegistry,
    fetcher: &dyn Fetcher,
    store: &MetaStore,
    ctx: &WorkerContext,
    job_id: &str,
) {
    let Some(request) = registry.begin(job_id) else {
        return;
    };
    info!(job_id, request, "Job started");

    let workspace = ctx.temp_root.join(workspace_dir_name(job_id));
    if let Err(e) = fs::create_dir_all(&workspace) {
        registry.fail(job_id, format!("failed to create workspace: {e}"));
        return;
    }
    if let Err(e) = fs::create_dir_all(&ctx.cache_root) {
        registry.fail(job_id, format!("failed to create cache directory: {e}"));
        return;
    }
    registry.annotate(job_id, "phase", "fetching");

    let token = registry.cancel_token(job_id);
    let fetched = tokio::select! {
        () = token.cancelled() => {
            info!(job_id, "Job cancelled");
            registry.mark_cancelled(job_id);
            return;
        }
        fetched = fetcher.run(&request, &ctx.cache_root, &workspace) => fetched,
    };

    match fetched {
        Ok(artifacts) => {
            registry.record_pending(job_id, &artifacts);
            registry.annotate(job_id, "phase", "indexing");
            for group in group_by_series(&ctx.cache_root, &artifacts) {
                if let Err(e) = store.merge_write(
                    &group.series_name,
                    &request,
                    &group.cache_path,
                    group.artifact_names.clone(),
                ) {
                    warn!(
                        job_id,
                        series = %group.series_name,
                        "Failed to record series metadata: {e}"
                    );
                }
            }
            info!(job_id, artifacts = artifacts.len(), "Job finished");
            registry.finish(job_id, artifacts);
        }
        Err(e) => {
            warn!(job_id, "Job failed: {e}");
            registry.fail(job_id, e.to_string());
        }
    }
}

struct SeriesGroup {
    series_name: String,
    cache_path: PathBuf,
    artifact_names: Vec<String>,
}

/// Group artifact paths by their containing series directory. Files sitting
/// directly under the cache root form a single-artifact series named after
/// the file stem.
fn group_by_series(cache_root: &Path, artifacts: &[PathBuf]) -> Vec<SeriesGroup> {
    let mut groups: BTreeMap<(String, PathBuf), Vec<String>> = BTreeMap::new();
    for path in artifacts {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let parent = path.parent().unwrap_or(cache_root);
        let key = if parent == cache_root {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(file_name);
            (stem.to_string(), cache_root.to_path_buf())
        } else {
            match parent.file_name().and_then(|n| n.to_str()) {
                Some(series) => (series.to_string(), parent.to_path_buf()),
                None => continue,
            }
        };
        groups.entry(key).or_default().push(file_name.to_string());
    }
    groups
        .into_iter()
        .map(|((series_name, cache_path), artifact_names)| SeriesGroup {
            series_name,
            cache_path,
            artifact_names,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_by_parent_directory() {
        let root = Path::new("/cache");
        let groups = group_by_series(
            root,
            &[
                PathBuf::from("/cache/SeriesA/ch1.cbz"),
                PathBuf::from("/cache/SeriesA/ch2.cbz"),
                PathBuf::from("/cache/SeriesB/ch1.cbz"),
            ],
        );
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].series_name, "SeriesA");
        assert_eq!(groups[0].cache_path, Path::new("/cache/SeriesA"));
        assert_eq!(groups[0].artifact_names, vec!["ch1.cbz", "ch2.cbz"]);
        assert_eq!(groups[1].series_name, "SeriesB");
    }

    #[test]
    fn top_level_file_named_by_stem() {
        let root = Path::new("/cache");
        let groups = group_by_series(root, &[PathBuf::from("/cache/OneShot.cbz")]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].series_name, "OneShot");
        assert_eq!(groups[0].cache_path, Path::new("/cache"));
        assert_eq!(groups[0].artifact_names, vec!["OneShot.cbz"]);
    }
}
