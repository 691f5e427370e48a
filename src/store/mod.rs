//! Storage seams for job records and distance telemetry.

mod memory;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use memory::{InMemoryDistanceStore, InMemoryJobStore};

use crate::error::Result;
use crate::state_machine::{Job, JobId, JobStatus, Stamp, UserId};

/// Result of a conditional write.
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome {
    /// The stored job matched the expected stamp and was replaced.
    Swapped(Job),
    /// Someone else got there first; carries the stamp actually stored.
    Conflict(Stamp),
}

/// Selection criteria for [`JobStore::find`]. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFilter {
    #[serde(default)]
    pub statuses: Vec<JobStatus>,
    pub customer: Option<UserId>,
    pub worker: Option<UserId>,
    pub flagged: Option<bool>,
}

impl JobFilter {
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&job.status))
            && self.customer.is_none_or(|c| job.customer == c)
            && self.worker.is_none_or(|w| job.assigned_worker == Some(w))
            && self.flagged.is_none_or(|f| job.flagged == f)
    }
}

/// Job Record Store.
///
/// Every method is atomic with respect to a single job. Implementations must
/// not let a write to one job wait on another.
pub trait JobStore: Send + Sync {
    /// Store a new job. Ids must be fresh; a duplicate is a store failure.
    fn insert(&self, job: Job) -> Result<()>;

    /// `Ok(None)` for unknown ids; errors mean the store itself failed.
    fn get(&self, id: JobId) -> Result<Option<Job>>;

    /// Jobs matching `filter`, oldest first.
    fn find(&self, filter: &JobFilter) -> Result<Vec<Job>>;

    /// Read-modify-write under the job's lock. `f` works on a copy; the copy
    /// is stored only if `f` returns `Ok`. Fails with `NotFound` for unknown ids.
    fn update<F>(&self, id: JobId, f: F) -> Result<Job>
    where
        F: FnOnce(&mut Job) -> Result<()>;

    /// Replace the job with `next` only if its stored `(status, epoch)` still
    /// equals `expected`.
    fn compare_and_swap(&self, id: JobId, expected: Stamp, next: Job) -> Result<CasOutcome>;
}

/// Distance and travel time recorded for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceRecord {
    pub job_id: JobId,
    pub distance: Option<f64>,
    pub time: Option<Duration>,
}

/// Distance/Telemetry Store. Records are created on first write.
pub trait DistanceStore: Send + Sync {
    fn get(&self, job_id: JobId) -> Result<Option<DistanceRecord>>;

    /// Create or update the record; `None` fields keep their stored value.
    fn upsert(
        &self,
        job_id: JobId,
        distance: Option<f64>,
        time: Option<Duration>,
    ) -> Result<DistanceRecord>;
}

impl<S: JobStore> JobStore for std::sync::Arc<S> {
    fn insert(&self, job: Job) -> Result<()> {
        (**self).insert(job)
    }

    fn get(&self, id: JobId) -> Result<Option<Job>> {
        (**self).get(id)
    }

    fn find(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        (**self).find(filter)
    }

    fn update<F>(&self, id: JobId, f: F) -> Result<Job>
    where
        F: FnOnce(&mut Job) -> Result<()>,
    {
        (**self).update(id, f)
    }

    fn compare_and_swap(&self, id: JobId, expected: Stamp, next: Job) -> Result<CasOutcome> {
        (**self).compare_and_swap(id, expected, next)
    }
}

impl<D: DistanceStore> DistanceStore for std::sync::Arc<D> {
    fn get(&self, job_id: JobId) -> Result<Option<DistanceRecord>> {
        (**self).get(job_id)
    }

    fn upsert(
        &self,
        job_id: JobId,
        distance: Option<f64>,
        time: Option<Duration>,
    ) -> Result<DistanceRecord> {
        (**self).upsert(job_id, distance, time)
    }
}
