//! Port traits (hexagonal architecture).
//!
//! The store owns sources and jobs; the scheduling core holds read snapshots
//! and submits updates through this trait. Adapters (a database-backed
//! implementation, the in-memory test double) live outside this crate.

use crate::error::Result;
use crate::ids::{JobId, SourceId};
use crate::job::{Job, Trigger};
use crate::source::Source;
use async_trait::async_trait;

/// Filter for [`Store::get_sources`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceFilter {
    /// Only sources in the NOOP state whose `next_fire` has passed.
    pub scheduled_to_run: bool,
    /// Replace secret values with masks in the returned snapshots.
    pub mask_secrets: bool,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Lists job sources matching the filter.
    async fn get_sources(&self, filter: SourceFilter) -> Result<Vec<Source>>;

    /// Gets the source with the specified id.
    async fn get_source(&self, id: SourceId) -> Result<Source>;

    /// Persists source state changes and returns the stored snapshot.
    async fn update_source(&self, source: &Source) -> Result<Source>;

    /// Creates a new job in the QUEUED state.
    async fn add_job(&self, source_id: SourceId, trigger: Trigger) -> Result<Job>;

    /// Gets a job by its id.
    async fn get_job(&self, id: JobId) -> Result<Job>;

    /// Persists job state changes and returns the stored snapshot.
    async fn update_job(&self, job: &Job) -> Result<Job>;
}
