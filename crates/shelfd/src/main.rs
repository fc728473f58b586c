//! shelfd, a fetch-and-archive daemon
//!
//! Accepts title URLs, fetches them with an external tool on a worker pool,
//! and keeps the resulting artifact cache bounded by age. `serve` runs the
//! pool plus periodic maintenance; the other subcommands operate on the same
//! state directories as one-shot invocations.

// CLI binary reports to stdout by design.
#![allow(clippy::print_stdout)]

mod settings;
mod validate;

use clap::{Parser, Subcommand};
use miette::miette;
use settings::{Paths, Settings};
use shelf_cache::{ActiveReferences, MetaStore, Sweeper, reap};
use shelf_fetch::CbzFetcher;
use shelf_registry::{JobQueue, JobRegistry, RegistryConfig, WorkerContext, WorkerPool};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "shelfd")]
#[command(about = "Fetch-and-archive daemon with a TTL-bounded artifact cache")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the worker pool and periodic cache maintenance
    Serve,
    /// Submit one title URL and wait for it to finish
    Fetch {
        /// Title URL to fetch
        url: String,
    },
    /// Show the status of a job
    Status {
        /// Job identifier returned at submission
        job_id: String,
    },
    /// Cancel a queued or running job
    Cancel {
        /// Job identifier returned at submission
        job_id: String,
    },
    /// List cached series
    Ls,
    /// Remove a series and its cached artifacts
    Rm {
        /// Series name as shown by `ls`
        series: String,
    },
    /// Run one cache eviction pass
    Sweep,
    /// Remove scratch workspaces of finished jobs
    Reap,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let paths = cli.settings.paths()?;

    match cli.command {
        Command::Serve => serve(&cli.settings, &paths).await,
        Command::Fetch { url } => fetch_one(&cli.settings, &paths, &url).await,
        Command::Status { job_id } => status(&cli.settings, &paths, &job_id),
        Command::Cancel { job_id } => cancel(&cli.settings, &paths, &job_id),
        Command::Ls => list_series(&paths),
        Command::Rm { series } => remove_series(&paths, &series),
        Command::Sweep => sweep_once(&cli.settings, &paths),
        Command::Reap => reap_once(&cli.settings, &paths),
    }
}

fn open_registry(settings: &Settings, paths: &Paths) -> miette::Result<(Arc<JobRegistry>, JobQueue)> {
    Ok(JobRegistry::open(RegistryConfig {
        state_dir: paths.state_dir.clone(),
        job_ttl: settings.job_ttl(),
    })?)
}

fn open_store(paths: &Paths) -> miette::Result<MetaStore> {
    Ok(MetaStore::open(paths.state_dir.join("series"))?)
}

fn spawn_pool(
    settings: &Settings,
    paths: &Paths,
    queue: JobQueue,
    registry: &Arc<JobRegistry>,
    store: &MetaStore,
) -> WorkerPool {
    let fetcher = Arc::new(CbzFetcher::new(&settings.fetch_bin, settings.fetch_timeout()));
    WorkerPool::spawn(
        settings.workers,
        queue,
        Arc::clone(registry),
        fetcher,
        store.clone(),
        WorkerContext {
            cache_root: paths.cache_root.clone(),
            temp_root: paths.temp_root.clone(),
        },
    )
}

async fn serve(settings: &Settings, paths: &Paths) -> miette::Result<()> {
    let (registry, queue) = open_registry(settings, paths)?;
    let store = open_store(paths)?;
    let pool = spawn_pool(settings, paths, queue, &registry, &store);
    info!(
        workers = settings.workers,
        cache = %paths.cache_root.display(),
        "shelfd serving"
    );

    let sweeper = Sweeper::new(store, Arc::clone(&registry) as Arc<dyn ActiveReferences>);
    let mut ticker = tokio::time::interval(settings.sweep_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick fires immediately; skip it so startup is not a sweep.
    ticker.tick().await;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Failed to listen for shutdown signal: {e}");
                }
                info!("Shutting down");
                break;
            }
            _ = ticker.tick() => {
                maintenance(settings, paths, &sweeper, &registry);
            }
        }
    }
    pool.abort();
    Ok(())
}

fn maintenance(settings: &Settings, paths: &Paths, sweeper: &Sweeper, registry: &Arc<JobRegistry>) {
    match sweeper.sweep(&paths.cache_root, settings.cache_ttl()) {
        Ok(outcome) => {
            if outcome != shelf_cache::SweepOutcome::default() {
                info!(
                    files = outcome.files_removed,
                    dirs = outcome.dirs_removed,
                    records = outcome.records_removed,
                    skipped = outcome.files_skipped,
                    "Cache sweep finished"
                );
            }
        }
        Err(e) => warn!("Cache sweep failed: {e}"),
    }
    match reap(&paths.temp_root, registry.as_ref()) {
        Ok(removed) if removed > 0 => info!(removed, "Reaped scratch workspaces"),
        Ok(_) => {}
        Err(e) => warn!("Workspace reap failed: {e}"),
    }
    registry.purge_expired();
}

async fn fetch_one(settings: &Settings, paths: &Paths, url: &str) -> miette::Result<()> {
    if !validate::is_title_url(url) {
        return Err(miette!("not a recognised title URL: {url}"));
    }
    let (registry, queue) = open_registry(settings, paths)?;
    let store = open_store(paths)?;
    let pool = spawn_pool(settings, paths, queue, &registry, &store);

    let id = registry.submit(url)?;
    println!("job {id}");

    let job = loop {
        match registry.status(&id) {
            Some(job) if job.state.is_terminal() => break job,
            Some(_) => tokio::time::sleep(Duration::from_millis(500)).await,
            None => return Err(miette!("job {id} disappeared while running")),
        }
    };
    pool.abort();

    match job.state {
        shelf_registry::JobState::Finished => {
            if let Some(artifacts) = registry.result(&id) {
                for path in artifacts {
                    println!("{}", path.display());
                }
            }
            Ok(())
        }
        shelf_registry::JobState::Cancelled => Err(miette!("job {id} was cancelled")),
        _ => Err(miette!(
            "fetch failed: {}",
            job.error.unwrap_or_else(|| "unknown error".into())
        )),
    }
}

fn status(settings: &Settings, paths: &Paths, job_id: &str) -> miette::Result<()> {
    let (registry, _queue) = open_registry(settings, paths)?;
    let Some(job) = registry.status(job_id) else {
        return Err(miette!("no such job: {job_id}"));
    };
    let rendered = serde_json::to_string_pretty(&job)
        .map_err(|e| miette!("failed to render status: {e}"))?;
    println!("{rendered}");
    Ok(())
}

fn cancel(settings: &Settings, paths: &Paths, job_id: &str) -> miette::Result<()> {
    let (registry, _queue) = open_registry(settings, paths)?;
    if registry.cancel(job_id) {
        println!("cancelled {job_id}");
        Ok(())
    } else {
        Err(miette!("job {job_id} is not cancellable"))
    }
}

fn list_series(paths: &Paths) -> miette::Result<()> {
    let store = open_store(paths)?;
    for record in store.list_all()? {
        println!(
            "{}\t{} artifacts\tupdated {}",
            record.series_name,
            record.artifact_names.len(),
            record.last_updated.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

fn remove_series(paths: &Paths, series: &str) -> miette::Result<()> {
    let store = open_store(paths)?;
    let Some(record) = store.get(series)? else {
        return Err(miette!("no such series: {series}"));
    };
    // Artifacts live either in a series directory or directly in the root;
    // only a dedicated directory is removed wholesale.
    if record.cache_path != paths.cache_root && record.cache_path.is_dir() {
        std::fs::remove_dir_all(&record.cache_path)
            .map_err(|e| miette!("failed to remove {}: {e}", record.cache_path.display()))?;
    } else {
        for name in &record.artifact_names {
            let path = record.cache_path.join(name);
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), "Failed to remove artifact: {e}");
                }
            }
        }
    }
    store.delete(series)?;
    println!("removed {series}");
    Ok(())
}

fn sweep_once(settings: &Settings, paths: &Paths) -> miette::Result<()> {
    let (registry, _queue) = open_registry(settings, paths)?;
    let store = open_store(paths)?;
    let sweeper = Sweeper::new(store, Arc::clone(&registry) as Arc<dyn ActiveReferences>);
    let outcome = sweeper.sweep(&paths.cache_root, settings.cache_ttl())?;
    println!(
        "removed {} files, {} directories, {} stale records ({} skipped)",
        outcome.files_removed, outcome.dirs_removed, outcome.records_removed, outcome.files_skipped
    );
    Ok(())
}

fn reap_once(settings: &Settings, paths: &Paths) -> miette::Result<()> {
    let (registry, _queue) = open_registry(settings, paths)?;
    let removed = reap(&paths.temp_root, registry.as_ref())?;
    println!("removed {removed} workspaces");
    Ok(())
}
