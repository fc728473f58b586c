//! Job registry, queue and worker pool
//!
//! Jobs are submitted as opaque request strings, executed by a pool of tokio
//! workers invoking a [`shelf_fetch::Fetcher`], and tracked through a closed
//! lifecycle persisted one JSON file per job. The registry also answers two
//! questions for the maintenance side of the system: which artifact paths are
//! owned by live jobs, and whether a given job has reached a terminal state.

mod error;
mod job;
mod registry;
mod worker;

pub use error::{Error, Result};
pub use job::{JobRecord, JobState, JobStatus};
pub use registry::{JobQueue, JobRegistry, RegistryConfig};
pub use worker::{WorkerContext, WorkerPool};
