//! Durable series metadata store
//!
//! One JSON document per series under the store directory. The filesystem
//! under the cache root stays authoritative for artifact existence; these
//! records are a derived index and are reconciled against the disk by
//! [`MetaStore::reconcile`].

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Metadata record for one cached series
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeriesRecord {
    /// Stable identifier, derived from the artifact directory name
    pub series_name: String,
    /// Original request identifier that produced the artifacts
    pub source_reference: String,
    /// Directory containing the series' artifacts
    pub cache_path: PathBuf,
    /// File basenames belonging to the series
    pub artifact_names: BTreeSet<String>,
    /// Timestamp of the most recent write
    pub last_updated: DateTime<Utc>,
}

impl SeriesRecord {
    /// True when at least one listed artifact still exists under
    /// `cache_path`.
    #[must_use]
    pub fn any_artifact_on_disk(&self) -> bool {
        self.artifact_names
            .iter()
            .filter(|name| !name.is_empty())
            .any(|name| self.cache_path.join(name).exists())
    }
}

/// Keyed store of [`SeriesRecord`]s backed by a directory of JSON files.
///
/// Handles are cheap to clone and are constructed once and passed into
/// each component that needs them.
#[derive(Debug, Clone)]
pub struct MetaStore {
    dir: PathBuf,
}

fn record_file_name(series_name: &str) -> String {
    let digest = Sha256::digest(series_name.as_bytes());
    format!("{}.json", hex::encode(&digest[..8]))
}

impl MetaStore {
    /// Open (creating if necessary) a store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| Error::io(e, &dir, "create_dir_all"))?;
        Ok(Self { dir })
    }

    /// Directory holding the record files
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, series_name: &str) -> PathBuf {
        self.dir.join(record_file_name(series_name))
    }

    fn lock_handle(&self) -> Result<fs::File> {
        let lock_path = self.dir.join(".lock");
        let handle = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| Error::io(e, &lock_path, "open"))?;
        handle
            .lock_exclusive()
            .map_err(|e| Error::io(e, &lock_path, "lock"))?;
        Ok(handle)
    }

    fn read_record(&self, path: &Path) -> Result<Option<SeriesRecord>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(e, path, "read")),
        };
        let record = serde_json::from_str(&content)
            .map_err(|e| Error::serialization(format!("Failed to parse series record: {e}")))?;
        Ok(Some(record))
    }

    fn write_record(&self, record: &SeriesRecord) -> Result<()> {
        let path = self.record_path(&record.series_name);
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| Error::serialization(format!("Failed to serialize record: {e}")))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| Error::io(e, &tmp, "write"))?;
        fs::rename(&tmp, &path).map_err(|e| Error::io(e, &path, "rename"))?;
        Ok(())
    }

    /// Upsert a record for `series_name`, unioning `artifact_names` with
    /// any existing set. Scalar fields take the latest write. Concurrent
    /// merges for the same series lose neither side's artifacts; the whole
    /// read-merge-write runs under an exclusive advisory lock.
    pub fn merge_write(
        &self,
        series_name: &str,
        source_reference: &str,
        cache_path: &Path,
        artifact_names: impl IntoIterator<Item = String>,
    ) -> Result<SeriesRecord> {
        let lock = self.lock_handle()?;

        let mut names: BTreeSet<String> = artifact_names.into_iter().collect();
        if let Some(existing) = self.read_record(&self.record_path(series_name))? {
            names.extend(existing.artifact_names);
        }

        let record = SeriesRecord {
            series_name: series_name.to_string(),
            source_reference: source_reference.to_string(),
            cache_path: cache_path.to_path_buf(),
            artifact_names: names,
            last_updated: Utc::now(),
        };
        self.write_record(&record)?;
        drop(lock);

        debug!(
            series = series_name,
            artifacts = record.artifact_names.len(),
            "Merged series record"
        );
        Ok(record)
    }

    /// Look up a single series record
    pub fn get(&self, series_name: &str) -> Result<Option<SeriesRecord>> {
        self.read_record(&self.record_path(series_name))
    }

    /// All records, sorted case-insensitively by series name.
    ///
    /// Unparsable record files are skipped with a warning rather than
    /// failing the listing.
    pub fn list_all(&self) -> Result<Vec<SeriesRecord>> {
        let mut records = Vec::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(Error::io(e, &self.dir, "read_dir")),
        };

        for entry in entries {
            let entry = entry.map_err(|e| Error::io(e, &self.dir, "read_dir_entry"))?;
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match self.read_record(&path) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => {
                    warn!(path = %path.display(), "Skipping unreadable series record: {e}");
                }
            }
        }

        records.sort_by_key(|r| r.series_name.to_lowercase());
        Ok(records)
    }

    /// Delete a series record. Returns whether a record existed.
    pub fn delete(&self, series_name: &str) -> Result<bool> {
        let path = self.record_path(series_name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::io(e, &path, "remove_file")),
        }
    }

    /// Drop every record with zero surviving artifacts on disk.
    ///
    /// Returns the number of records removed. Called from the eviction
    /// sweep and independently usable as a maintenance operation.
    pub fn reconcile(&self) -> Result<usize> {
        let mut removed = 0;
        for record in self.list_all()? {
            if record.any_artifact_on_disk() {
                continue;
            }
            if self.delete(&record.series_name)? {
                debug!(series = %record.series_name, "Removed stale series record");
                removed += 1;
            }
        }
        Ok(removed)
    }
}
