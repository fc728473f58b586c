//! Daemon configuration
//!
//! Every knob is a flag with an `SHELF_*` environment variable fallback.
//! Directory defaults follow the platform conventions via `dirs`.

use clap::Args;
use miette::miette;
use std::path::PathBuf;
use std::time::Duration;

/// Shared configuration for all subcommands
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Cache root where finished artifacts live
    #[arg(long, env = "SHELF_CACHE_DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Parent directory for per-job scratch workspaces
    #[arg(long, env = "SHELF_TEMP_DIR", global = true)]
    pub temp_dir: Option<PathBuf>,

    /// Directory holding job and series records
    #[arg(long, env = "SHELF_STATE_DIR", global = true)]
    pub state_dir: Option<PathBuf>,

    /// Number of concurrent fetch workers
    #[arg(long, env = "SHELF_WORKERS", default_value_t = 3, global = true)]
    pub workers: usize,

    /// Seconds a finished job remains queryable, 0 keeps records forever
    #[arg(long, env = "SHELF_JOB_TTL_SECS", default_value_t = 3600, global = true)]
    pub job_ttl_secs: u64,

    /// Seconds before an unreferenced artifact expires, 0 disables eviction
    #[arg(long, env = "SHELF_CACHE_TTL_SECS", default_value_t = 604_800, global = true)]
    pub cache_ttl_secs: u64,

    /// Seconds a single fetch may run before it is failed
    #[arg(long, env = "SHELF_FETCH_TIMEOUT_SECS", default_value_t = 300, global = true)]
    pub fetch_timeout_secs: u64,

    /// Fetch tool binary to invoke
    #[arg(long, env = "SHELF_FETCH_BIN", default_value = shelf_fetch::DEFAULT_TOOL, global = true)]
    pub fetch_bin: PathBuf,

    /// Seconds between maintenance passes in serve mode
    #[arg(long, env = "SHELF_SWEEP_INTERVAL_SECS", default_value_t = 60, global = true)]
    pub sweep_interval_secs: u64,
}

/// Resolved filesystem layout
#[derive(Debug, Clone)]
pub struct Paths {
    /// Cache root for finished artifacts
    pub cache_root: PathBuf,
    /// Parent of per-job scratch workspaces
    pub temp_root: PathBuf,
    /// Job records and series metadata
    pub state_dir: PathBuf,
}

impl Settings {
    /// Resolve the configured or platform-default directories
    pub fn paths(&self) -> miette::Result<Paths> {
        let cache_root = match &self.cache_dir {
            Some(dir) => dir.clone(),
            None => dirs::cache_dir()
                .ok_or_else(|| miette!("no cache directory for this platform, set SHELF_CACHE_DIR"))?
                .join("shelf"),
        };
        let temp_root = self
            .temp_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("shelf"));
        let state_dir = match &self.state_dir {
            Some(dir) => dir.clone(),
            None => dirs::state_dir()
                .or_else(dirs::data_local_dir)
                .ok_or_else(|| miette!("no state directory for this platform, set SHELF_STATE_DIR"))?
                .join("shelf"),
        };
        Ok(Paths {
            cache_root,
            temp_root,
            state_dir,
        })
    }

    /// TTL for terminal job records
    #[must_use]
    pub const fn job_ttl(&self) -> Duration {
        Duration::from_secs(self.job_ttl_secs)
    }

    /// TTL for unreferenced cache artifacts
    #[must_use]
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Deadline for a single fetch invocation
    #[must_use]
    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Interval between maintenance passes
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
