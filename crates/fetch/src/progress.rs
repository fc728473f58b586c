//! Progress line parsing for fetch tool output

use regex::Regex;
use std::sync::LazyLock;

static CHAPTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Downloading chapter (\d+) of (\d+)").expect("valid chapter regex")
});

/// Progress extracted from the fetch tool's stdout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    /// Chapter currently being fetched, if reported
    pub current: Option<u64>,
    /// Total number of chapters, if reported
    pub total: Option<u64>,
    /// Number of chapters skipped because they were already cached
    pub cached: u64,
}

/// Parse progress information from the fetch tool's stdout.
///
/// The tool prints `Downloading chapter X of Y` lines as it works and
/// `Skipped (already downloaded)` for chapters it found in place. Later
/// chapter lines supersede earlier ones.
#[must_use]
pub fn parse_progress(stdout: &str) -> Progress {
    let mut progress = Progress::default();

    for line in stdout.lines() {
        if let Some(caps) = CHAPTER_RE.captures(line) {
            progress.current = caps.get(1).and_then(|m| m.as_str().parse().ok());
            progress.total = caps.get(2).and_then(|m| m.as_str().parse().ok());
        }
        if line.contains("Skipped (already downloaded)") {
            progress.cached += 1;
        }
    }

    progress
}
