use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::state_machine::{Job, UserId};

/// A worker that can be offered jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerProfile {
    pub id: UserId,
    /// Languages the worker covers. Empty means any.
    #[serde(default)]
    pub languages: BTreeSet<String>,
}

impl WorkerProfile {
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            languages: BTreeSet::new(),
        }
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.languages.insert(language.to_string());
        self
    }

    pub fn covers(&self, job: &Job) -> bool {
        self.languages.is_empty()
            || self
                .languages
                .iter()
                .any(|l| l.eq_ignore_ascii_case(&job.details.language))
    }
}

/// Workers eligible for broadcast offers.
#[derive(Debug, Default)]
pub struct WorkerRoster {
    workers: HashMap<UserId, WorkerProfile>,
}

impl WorkerRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a worker.
    pub fn register(&mut self, profile: WorkerProfile) {
        tracing::info!(worker_id = %profile.id, languages = ?profile.languages, "Worker registered");
        self.workers.insert(profile.id, profile);
    }

    pub fn deregister(&mut self, id: UserId) -> bool {
        let removed = self.workers.remove(&id).is_some();
        if removed {
            tracing::info!(worker_id = %id, "Worker deregistered");
        }
        removed
    }

    pub fn contains(&self, id: UserId) -> bool {
        self.workers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Workers who should hear about `job`, in ascending id order.
    pub fn eligible_for(&self, job: &Job) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self
            .workers
            .values()
            .filter(|w| w.covers(job))
            .map(|w| w.id)
            .collect();
        ids.sort_unstable();
        ids
    }
}
