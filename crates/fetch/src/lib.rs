//! External fetch tool boundary for shelf
//!
//! This crate isolates the one external collaborator the job pipeline
//! depends on: the CLI tool that downloads chapter archives for a
//! requested title. It provides:
//! - The [`Fetcher`] trait the worker pool executes against
//! - [`CbzFetcher`], the production implementation shelling out to the tool
//! - Snapshot-diff attribution of a job's own output
//! - Progress line parsing for job annotations
//!
//! Everything upstream of this crate treats a fetch as an opaque call that
//! either returns the list of newly produced artifact paths or fails with
//! the tool's diagnostic text.

mod cli;
mod error;
mod progress;

pub use cli::{CbzFetcher, DEFAULT_TOOL, build_args, scan_cbz};
pub use error::{Error, Result};
pub use progress::{Progress, parse_progress};

use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// A source of fetched artifacts.
///
/// `run` blocks until the fetch completes or fails; implementations
/// enforce their own deadline and surface overruns as [`Error::Timeout`].
/// `work_dir` is the job's private scratch directory; `dest_dir` is the
/// shared cache tree the artifacts land in.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch artifacts for `request`, returning the paths produced by this
    /// call (and only this call).
    async fn run(&self, request: &str, dest_dir: &Path, work_dir: &Path) -> Result<Vec<PathBuf>>;
}
