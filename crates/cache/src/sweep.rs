//! TTL-based cache eviction
//!
//! The sweep deletes artifact files older than the TTL, skipping anything
//! an active job still references, prunes series directories that lost
//! their last file, and reconciles the metadata store afterwards. Errors
//! on individual files are counted and skipped; one bad file never aborts
//! a pass.

use crate::store::MetaStore;
use crate::Result;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Source of the artifact paths currently claimed by non-terminal jobs.
///
/// `None` means the active set could not be determined; the sweeper then
/// skips the whole pass, because uncertainty about which jobs are active
/// must never unprotect their files.
pub trait ActiveReferences: Send + Sync {
    /// Paths owned by jobs that are still queued or running
    fn active_artifact_paths(&self) -> Option<HashSet<PathBuf>>;
}

/// An empty reference set, for maintenance contexts with no job registry
#[derive(Debug, Clone, Copy, Default)]
pub struct NoActiveReferences;

impl ActiveReferences for NoActiveReferences {
    fn active_artifact_paths(&self) -> Option<HashSet<PathBuf>> {
        Some(HashSet::new())
    }
}

/// Counters reported by one sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Artifact files deleted
    pub files_removed: usize,
    /// Empty directories pruned
    pub dirs_removed: usize,
    /// Metadata records dropped during reconciliation
    pub records_removed: usize,
    /// Files that could not be deleted and were skipped
    pub files_skipped: usize,
}

/// Cache eviction engine
pub struct Sweeper {
    store: MetaStore,
    refs: std::sync::Arc<dyn ActiveReferences>,
}

impl Sweeper {
    /// Create a sweeper over the given store and reference source
    #[must_use]
    pub fn new(store: MetaStore, refs: std::sync::Arc<dyn ActiveReferences>) -> Self {
        Self { store, refs }
    }

    /// Run one eviction pass over `cache_root`.
    ///
    /// A zero `ttl` is the explicit never-expire policy; the pass is a
    /// no-op. An empty or missing cache root removes nothing and is not an
    /// error.
    pub fn sweep(&self, cache_root: &Path, ttl: Duration) -> Result<SweepOutcome> {
        let mut outcome = SweepOutcome::default();

        if ttl.is_zero() {
            debug!("Cache TTL is zero, eviction disabled");
            return Ok(outcome);
        }
        if !cache_root.exists() {
            return Ok(outcome);
        }

        let Some(active) = self.refs.active_artifact_paths() else {
            warn!("Could not determine active job references, skipping eviction pass");
            return Ok(outcome);
        };

        let now = SystemTime::now();
        for entry in WalkDir::new(cache_root).min_depth(1).max_depth(2) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(root = %cache_root.display(), "Skipping unreadable entry: {e}");
                    outcome.files_skipped += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if active.contains(path) {
                debug!(path = %path.display(), "Referenced by an active job, keeping");
                continue;
            }
            if !Self::older_than(path, now, ttl) {
                continue;
            }
            match fs::remove_file(path) {
                Ok(()) => {
                    debug!(path = %path.display(), "Evicted expired artifact");
                    outcome.files_removed += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), "Could not evict artifact: {e}");
                    outcome.files_skipped += 1;
                }
            }
        }

        outcome.dirs_removed = prune_empty_dirs(cache_root);
        outcome.records_removed = self.store.reconcile()?;

        if outcome != SweepOutcome::default() {
            info!(
                files = outcome.files_removed,
                dirs = outcome.dirs_removed,
                records = outcome.records_removed,
                skipped = outcome.files_skipped,
                "Cache eviction pass finished"
            );
        }
        Ok(outcome)
    }

    fn older_than(path: &Path, now: SystemTime, ttl: Duration) -> bool {
        let Ok(meta) = fs::metadata(path) else {
            return false;
        };
        let Ok(modified) = meta.modified() else {
            return false;
        };
        now.duration_since(modified)
            .is_ok_and(|age| age > ttl)
    }
}

/// Remove now-empty directories under `cache_root`, deepest first.
///
/// The root itself is never removed; directories that still contain any
/// file, tracked or not, are left intact.
fn prune_empty_dirs(cache_root: &Path) -> usize {
    let mut removed = 0;
    for entry in WalkDir::new(cache_root)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_map(std::result::Result::ok)
    {
        if !entry.file_type().is_dir() {
            continue;
        }
        let path = entry.path();
        let is_empty = fs::read_dir(path).is_ok_and(|mut it| it.next().is_none());
        if is_empty && fs::remove_dir(path).is_ok() {
            debug!(path = %path.display(), "Pruned empty series directory");
            removed += 1;
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);
    const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

    fn age_file(path: &Path, age: Duration) {
        let mtime = SystemTime::now() - age;
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(mtime).unwrap();
    }

    struct FixedRefs(Option<HashSet<PathBuf>>);

    impl ActiveReferences for FixedRefs {
        fn active_artifact_paths(&self) -> Option<HashSet<PathBuf>> {
            self.0.clone()
        }
    }

    fn sweeper_with(tmp: &TempDir, refs: FixedRefs) -> Sweeper {
        let store = MetaStore::open(tmp.path().join("series")).unwrap();
        Sweeper::new(store, Arc::new(refs))
    }

    #[test]
    fn removes_expired_file() {
        let tmp = TempDir::new().unwrap();
        let cache = tmp.path().join("cache");
        fs::create_dir(&cache).unwrap();
        let old = cache.join("old.cbz");
        fs::write(&old, b"old").unwrap();
        age_file(&old, 8 * DAY);

        let sweeper = sweeper_with(&tmp, FixedRefs(Some(HashSet::new())));
        let outcome = sweeper.sweep(&cache, WEEK).unwrap();

        assert_eq!(outcome.files_removed, 1);
        assert!(!old.exists());
    }

    #[test]
    fn keeps_recent_file() {
        let tmp = TempDir::new().unwrap();
        let cache = tmp.path().join("cache");
        fs::create_dir(&cache).unwrap();
        let recent = cache.join("recent.cbz");
        fs::write(&recent, b"recent").unwrap();

        let sweeper = sweeper_with(&tmp, FixedRefs(Some(HashSet::new())));
        let outcome = sweeper.sweep(&cache, WEEK).unwrap();

        assert_eq!(outcome.files_removed, 0);
        assert!(recent.exists());
    }

    #[test]
    fn never_removes_referenced_file_regardless_of_age() {
        let tmp = TempDir::new().unwrap();
        let cache = tmp.path().join("cache");
        fs::create_dir(&cache).unwrap();
        let active = cache.join("active.cbz");
        fs::write(&active, b"active").unwrap();
        age_file(&active, 30 * DAY);

        let refs = FixedRefs(Some(HashSet::from([active.clone()])));
        let sweeper = sweeper_with(&tmp, refs);
        let outcome = sweeper.sweep(&cache, WEEK).unwrap();

        assert_eq!(outcome.files_removed, 0);
        assert!(active.exists());
    }

    #[test]
    fn removes_only_unreferenced_expired_files() {
        let tmp = TempDir::new().unwrap();
        let cache = tmp.path().join("cache");
        fs::create_dir(&cache).unwrap();

        let expired = cache.join("expired.cbz");
        let referenced = cache.join("referenced.cbz");
        let recent = cache.join("recent.cbz");
        for path in [&expired, &referenced, &recent] {
            fs::write(path, b"x").unwrap();
        }
        age_file(&expired, 8 * DAY);
        age_file(&referenced, 8 * DAY);

        let refs = FixedRefs(Some(HashSet::from([referenced.clone()])));
        let sweeper = sweeper_with(&tmp, refs);
        let outcome = sweeper.sweep(&cache, WEEK).unwrap();

        assert_eq!(outcome.files_removed, 1);
        assert!(!expired.exists());
        assert!(referenced.exists());
        assert!(recent.exists());
    }

    #[test]
    fn zero_ttl_disables_eviction() {
        let tmp = TempDir::new().unwrap();
        let cache = tmp.path().join("cache");
        fs::create_dir(&cache).unwrap();
        let old = cache.join("old.cbz");
        fs::write(&old, b"old").unwrap();
        age_file(&old, 365 * DAY);

        let sweeper = sweeper_with(&tmp, FixedRefs(Some(HashSet::new())));
        let outcome = sweeper.sweep(&cache, Duration::ZERO).unwrap();

        assert_eq!(outcome, SweepOutcome::default());
        assert!(old.exists());
    }

    #[test]
    fn empty_cache_root_removes_nothing() {
        let tmp = TempDir::new().unwrap();
        let cache = tmp.path().join("cache");
        fs::create_dir(&cache).unwrap();

        let sweeper = sweeper_with(&tmp, FixedRefs(Some(HashSet::new())));
        assert_eq!(sweeper.sweep(&cache, WEEK).unwrap(), SweepOutcome::default());
    }

    #[test]
    fn missing_cache_root_is_not_an_error() {
        let tmp = TempDir::new().unwrap();
        let sweeper = sweeper_with(&tmp, FixedRefs(Some(HashSet::new())));
        let outcome = sweeper.sweep(&tmp.path().join("nope"), WEEK).unwrap();
        assert_eq!(outcome, SweepOutcome::default());
    }

    #[test]
    fn unknown_active_set_skips_the_pass() {
        let tmp = TempDir::new().unwrap();
        let cache = tmp.path().join("cache");
        fs::create_dir(&cache).unwrap();
        let old = cache.join("old.cbz");
        fs::write(&old, b"old").unwrap();
        age_file(&old, 30 * DAY);

        let sweeper = sweeper_with(&tmp, FixedRefs(None));
        let outcome = sweeper.sweep(&cache, WEEK).unwrap();

        assert_eq!(outcome, SweepOutcome::default());
        assert!(old.exists());
    }

    #[test]
    fn prunes_emptied_series_directory_but_not_occupied_one() {
        let tmp = TempDir::new().unwrap();
        let cache = tmp.path().join("cache");
        let emptied = cache.join("Old Series");
        let occupied = cache.join("Live Series");
        fs::create_dir_all(&emptied).unwrap();
        fs::create_dir_all(&occupied).unwrap();

        let old_chapter = emptied.join("ch1.cbz");
        fs::write(&old_chapter, b"x").unwrap();
        age_file(&old_chapter, 8 * DAY);

        let old_live = occupied.join("ch1.cbz");
        let recent_live = occupied.join("ch2.cbz");
        fs::write(&old_live, b"x").unwrap();
        fs::write(&recent_live, b"x").unwrap();
        age_file(&old_live, 8 * DAY);

        let sweeper = sweeper_with(&tmp, FixedRefs(Some(HashSet::new())));
        let outcome = sweeper.sweep(&cache, WEEK).unwrap();

        assert_eq!(outcome.files_removed, 2);
        assert_eq!(outcome.dirs_removed, 1);
        assert!(!emptied.exists());
        assert!(occupied.exists());
        assert!(recent_live.exists());
    }

    #[test]
    fn second_sweep_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let cache = tmp.path().join("cache");
        let series = cache.join("Series");
        fs::create_dir_all(&series).unwrap();
        let old = series.join("ch1.cbz");
        fs::write(&old, b"x").unwrap();
        age_file(&old, 8 * DAY);

        let sweeper = sweeper_with(&tmp, FixedRefs(Some(HashSet::new())));
        let first = sweeper.sweep(&cache, WEEK).unwrap();
        assert_eq!(first.files_removed, 1);

        let second = sweeper.sweep(&cache, WEEK).unwrap();
        assert_eq!(second, SweepOutcome::default());
    }

    #[test]
    fn sweep_reconciles_metadata_records() {
        let tmp = TempDir::new().unwrap();
        let cache = tmp.path().join("cache");
        let gone_dir = cache.join("Old Series");
        let live_dir = cache.join("Live Series");
        fs::create_dir_all(&gone_dir).unwrap();
        fs::create_dir_all(&live_dir).unwrap();

        let gone = gone_dir.join("ch1.cbz");
        fs::write(&gone, b"x").unwrap();
        age_file(&gone, 8 * DAY);
        fs::write(live_dir.join("ch1.cbz"), b"x").unwrap();

        let store = MetaStore::open(tmp.path().join("series")).unwrap();
        store
            .merge_write("Old Series", "src", &gone_dir, vec!["ch1.cbz".to_string()])
            .unwrap();
        store
            .merge_write("Live Series", "src", &live_dir, vec!["ch1.cbz".to_string()])
            .unwrap();

        let sweeper = Sweeper::new(store.clone(), Arc::new(FixedRefs(Some(HashSet::new()))));
        let outcome = sweeper.sweep(&cache, WEEK).unwrap();

        assert_eq!(outcome.records_removed, 1);
        assert!(store.get("Old Series").unwrap().is_none());
        assert!(store.get("Live Series").unwrap().is_some());
    }
}
