use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use super::{CasOutcome, DistanceRecord, DistanceStore, JobFilter, JobStore};
use crate::error::{DispatchError, Result};
use crate::state_machine::{Job, JobId, Stamp};

fn poisoned(what: &str) -> DispatchError {
    DispatchError::StoreUnavailable(format!("{what} lock poisoned"))
}

type Slot = Arc<Mutex<Job>>;

/// Job store with one lock per job.
///
/// The index lock is held only to look up or insert a slot, never while a
/// job is being read or written, so contention stays per job.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Slot>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: JobId) -> Result<Slot> {
        let jobs = self.jobs.read().map_err(|_| poisoned("job index"))?;
        jobs.get(&id).cloned().ok_or(DispatchError::NotFound(id))
    }

    fn lock(slot: &Mutex<Job>) -> Result<MutexGuard<'_, Job>> {
        slot.lock().map_err(|_| poisoned("job record"))
    }

    pub fn len(&self) -> usize {
        self.jobs.read().map(|jobs| jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl JobStore for InMemoryJobStore {
    fn insert(&self, job: Job) -> Result<()> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned("job index"))?;
        if jobs.contains_key(&job.id) {
            return Err(DispatchError::StoreUnavailable(format!(
                "job {} already exists",
                job.id
            )));
        }
        jobs.insert(job.id, Arc::new(Mutex::new(job)));
        Ok(())
    }

    fn get(&self, id: JobId) -> Result<Option<Job>> {
        match self.slot(id) {
            Ok(slot) => {
                let job = Self::lock(&slot)?.clone();
                Ok(Some(job))
            }
            Err(DispatchError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn find(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let slots: Vec<Slot> = {
            let jobs = self.jobs.read().map_err(|_| poisoned("job index"))?;
            jobs.values().cloned().collect()
        };

        let mut found = Vec::new();
        for slot in slots {
            let job = Self::lock(&slot)?;
            if filter.matches(&job) {
                found.push(job.clone());
            }
        }
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    fn update<F>(&self, id: JobId, f: F) -> Result<Job>
    where
        F: FnOnce(&mut Job) -> Result<()>,
    {
        let slot = self.slot(id)?;
        let mut stored = Self::lock(&slot)?;
        let mut draft = stored.clone();
        f(&mut draft)?;
        *stored = draft.clone();
        Ok(draft)
    }

    fn compare_and_swap(&self, id: JobId, expected: Stamp, next: Job) -> Result<CasOutcome> {
        if next.id != id {
            return Err(DispatchError::StoreUnavailable(format!(
                "refusing to store job {} under id {id}",
                next.id
            )));
        }
        let slot = self.slot(id)?;
        let mut stored = Self::lock(&slot)?;
        let current = stored.stamp();
        if current != expected {
            return Ok(CasOutcome::Conflict(current));
        }
        *stored = next.clone();
        Ok(CasOutcome::Swapped(next))
    }
}

/// Distance records keyed by job.
#[derive(Debug, Default)]
pub struct InMemoryDistanceStore {
    records: Mutex<HashMap<JobId, DistanceRecord>>,
}

impl InMemoryDistanceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DistanceStore for InMemoryDistanceStore {
    fn get(&self, job_id: JobId) -> Result<Option<DistanceRecord>> {
        let records = self.records.lock().map_err(|_| poisoned("distance"))?;
        Ok(records.get(&job_id).cloned())
    }

    fn upsert(
        &self,
        job_id: JobId,
        distance: Option<f64>,
        time: Option<Duration>,
    ) -> Result<DistanceRecord> {
        let mut records = self.records.lock().map_err(|_| poisoned("distance"))?;
        let record = records.entry(job_id).or_insert_with(|| DistanceRecord {
            job_id,
            distance: None,
            time: None,
        });
        if distance.is_some() {
            record.distance = distance;
        }
        if time.is_some() {
            record.time = time;
        }
        Ok(record.clone())
    }
}
