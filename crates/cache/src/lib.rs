//! Series metadata store and cache eviction for shelf
//!
//! This crate owns the on-disk side of the pipeline:
//! - A durable keyed store of series metadata records, merged on write so
//!   concurrent jobs for the same series never clobber each other
//! - The TTL-based eviction sweep over the artifact cache
//! - The reaper for per-job temp workspaces
//!
//! # Consistency
//!
//! The filesystem under the cache root is the source of truth for
//! artifact existence. Store records are a derived index; reconciliation
//! drops records whose artifacts are all gone, and the sweep never deletes
//! a file because of (or despite) what the index says about it.
//!
//! The job registry is reached only through the [`ActiveReferences`] and
//! [`JobProbe`] traits, injected at construction time.

mod error;
pub mod reap;
pub mod store;
pub mod sweep;

pub use error::{Error, Result};
pub use reap::{JobProbe, WORKSPACE_PREFIX, reap, workspace_dir_name};
pub use store::{MetaStore, SeriesRecord};
pub use sweep::{ActiveReferences, NoActiveReferences, SweepOutcome, Sweeper};
