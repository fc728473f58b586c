//! Invocation of the external fetch tool
//!
//! The tool downloads chapter archives for a requested title straight into
//! the shared cache tree. It does not take a job-scoped destination, so a
//! job's own output is attributed by snapshot diff: the set of `.cbz` files
//! under the destination is captured before and after the run, and the
//! difference is the job's result. Two concurrent jobs for overlapping
//! targets can race this diff; the design accepts that race and relies on
//! one-level series nesting to keep it rare.

use crate::progress::parse_progress;
use crate::{Error, Fetcher, Result};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Default name of the external fetch tool binary
pub const DEFAULT_TOOL: &str = "mangadex-dl";

/// Fetcher that shells out to the archive download tool
#[derive(Debug, Clone)]
pub struct CbzFetcher {
    binary: PathBuf,
    deadline: Duration,
}

impl CbzFetcher {
    /// Create a fetcher for the given tool binary and per-job deadline
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>, deadline: Duration) -> Self {
        Self {
            binary: binary.into(),
            deadline,
        }
    }
}

/// Build the argument list passed to the fetch tool.
///
/// Arguments follow the tool's non-interactive contract: every chapter as a
/// `.cbz` under `dest_dir`, all inputs selected, no progress bar rendering.
#[must_use]
pub fn build_args(request: &str, dest_dir: &Path) -> Vec<String> {
    vec![
        "--save-as".to_string(),
        "cbz".to_string(),
        "--path".to_string(),
        dest_dir.to_string_lossy().to_string(),
        "--input-pos".to_string(),
        "*".to_string(),
        "--progress-bar-layout".to_string(),
        "none".to_string(),
        request.to_string(),
    ]
}

/// Scan for `.cbz` artifact files under a directory.
///
/// Covers files directly under `dir` and one level of series
/// subdirectories, which is the full layout the cache uses.
pub fn scan_cbz(dir: &Path) -> Result<BTreeSet<PathBuf>> {
    let mut found = BTreeSet::new();
    if !dir.exists() {
        return Ok(found);
    }

    for entry in WalkDir::new(dir).min_depth(1).max_depth(2) {
        let entry = entry.map_err(|e| Error::io(e.into(), dir, "walk"))?;
        let path = entry.path();
        if path.is_file()
            && path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("cbz"))
        {
            found.insert(path.to_path_buf());
        }
    }

    Ok(found)
}

#[async_trait]
impl Fetcher for CbzFetcher {
    async fn run(&self, request: &str, dest_dir: &Path, work_dir: &Path) -> Result<Vec<PathBuf>> {
        // The gateway validates before submitting; this guard is for direct
        // callers of the fetch boundary.
        if !request.starts_with("https://mangadex.org/title/") {
            return Err(Error::configuration(format!(
                "Invalid MangaDex URL: {request}"
            )));
        }
        if !dest_dir.is_dir() {
            return Err(Error::configuration(format!(
                "Directory does not exist: {}",
                dest_dir.display()
            )));
        }

        let before = scan_cbz(dest_dir)?;
        debug!(
            request,
            dest = %dest_dir.display(),
            preexisting = before.len(),
            "Invoking fetch tool"
        );

        let mut cmd = Command::new(&self.binary);
        cmd.args(build_args(request, dest_dir))
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match timeout(self.deadline, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(Error::io(e, &self.binary, "spawn")),
            Err(_elapsed) => {
                warn!(request, "Fetch tool exceeded deadline, killing it");
                return Err(Error::Timeout {
                    seconds: self.deadline.as_secs(),
                });
            }
        };

        if !output.status.success() {
            return Err(Error::Tool {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let summary = parse_progress(&String::from_utf8_lossy(&output.stdout));
        if summary.cached > 0 {
            debug!(request, cached = summary.cached, "Chapters already in the cache were skipped");
        }

        let after = scan_cbz(dest_dir)?;
        let produced: Vec<PathBuf> = after.difference(&before).cloned().collect();
        debug!(request, produced = produced.len(), "Fetch tool finished");
        Ok(produced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn args_follow_tool_contract() {
        let args = build_args(
            "https://mangadex.org/title/test-123",
            Path::new("/test/cache"),
        );

        assert_eq!(
            args,
            vec![
                "--save-as",
                "cbz",
                "--path",
                "/test/cache",
                "--input-pos",
                "*",
                "--progress-bar-layout",
                "none",
                "https://mangadex.org/title/test-123",
            ]
        );
    }

    #[test]
    fn scan_finds_only_cbz_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("one.cbz"), b"a").unwrap();
        fs::write(dir.path().join("two.cbz"), b"b").unwrap();
        fs::write(dir.path().join("readme.txt"), b"not an archive").unwrap();

        let found = scan_cbz(dir.path()).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|p| p.extension().unwrap() == "cbz"));
    }

    #[test]
    fn scan_covers_series_subdirectories() {
        let dir = TempDir::new().unwrap();
        let series = dir.path().join("Some Series");
        fs::create_dir(&series).unwrap();
        fs::write(series.join("ch1.cbz"), b"a").unwrap();

        let found = scan_cbz(dir.path()).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn scan_of_empty_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(scan_cbz(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn scan_of_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(scan_cbz(&missing).unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_url_is_rejected_before_spawning() {
        let dir = TempDir::new().unwrap();
        let fetcher = CbzFetcher::new("true", Duration::from_secs(5));

        let err = fetcher
            .run("https://example.com/invalid", dir.path(), dir.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid MangaDex URL"));
    }

    #[tokio::test]
    async fn missing_destination_is_a_configuration_error() {
        let dir = TempDir::new().unwrap();
        let fetcher = CbzFetcher::new("true", Duration::from_secs(5));

        let err = fetcher
            .run(
                "https://mangadex.org/title/test-123",
                &dir.path().join("nonexistent"),
                dir.path(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Directory does not exist"));
    }

    #[tokio::test]
    async fn tool_failure_carries_stderr_verbatim() {
        let dir = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        // A tool that always fails with a diagnostic on stderr.
        let script = dir.path().join("failing-tool.sh");
        fs::write(
            &script,
            "#!/bin/sh\necho 'Download failed: network error' >&2\nexit 1\n",
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        }

        let dest = dir.path().join("cache");
        fs::create_dir(&dest).unwrap();
        let fetcher = CbzFetcher::new(&script, Duration::from_secs(5));

        let err = fetcher
            .run("https://mangadex.org/title/test-123", &dest, work.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Download failed: network error"));
    }

    #[tokio::test]
    async fn fetch_times_out() {
        let dir = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let dest = dir.path().join("cache");
        fs::create_dir(&dest).unwrap();

        // A tool that never finishes within the deadline.
        let script = dir.path().join("slow-tool.sh");
        fs::write(&script, "#!/bin/sh\nsleep 10\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        }

        let fetcher = CbzFetcher::new(&script, Duration::from_millis(100));
        let err = fetcher
            .run("https://mangadex.org/title/test-123", &dest, work.path())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn snapshot_diff_returns_only_new_files() {
        let dir = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let dest = dir.path().join("cache");
        fs::create_dir(&dest).unwrap();
        fs::write(dest.join("old.cbz"), b"old").unwrap();

        // A tool that drops a new archive into the destination.
        let script = dir.path().join("tool.sh");
        fs::write(
            &script,
            format!(
                "#!/bin/sh\necho new > '{}'\n",
                dest.join("new.cbz").display()
            ),
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        }

        let fetcher = CbzFetcher::new(&script, Duration::from_secs(5));
        let produced = fetcher
            .run("https://mangadex.org/title/test-123", &dest, work.path())
            .await
            .unwrap();

        assert_eq!(produced, vec![dest.join("new.cbz")]);
    }
}
