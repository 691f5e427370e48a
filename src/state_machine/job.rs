use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DispatchError, Result};

/// Unique, immutable job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a customer, worker or administrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Offered to the pool and waiting for its first acceptance.
    Open,
    /// Won by a worker who has not started yet.
    Assigned,
    InProgress,
    /// Finished. Keeps the worker for the record.
    Ended,
    /// Called off before it ended. Nobody holds it.
    Cancelled,
}

impl JobStatus {
    /// `Ended` and `Cancelled` accept no further transition except reopen.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Ended | JobStatus::Cancelled)
    }

    /// Statuses in which the job must carry an assigned worker.
    pub fn holds_worker(self) -> bool {
        matches!(
            self,
            JobStatus::Assigned | JobStatus::InProgress | JobStatus::Ended
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Open => write!(f, "open"),
            JobStatus::Assigned => write!(f, "assigned"),
            JobStatus::InProgress => write!(f, "in-progress"),
            JobStatus::Ended => write!(f, "ended"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Creation request as extracted by the HTTP layer. Fields may be missing;
/// [`JobSpec::validate`] decides whether the job can be created.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobSpec {
    /// Language the worker must speak.
    pub language: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub duration_minutes: Option<u32>,
    pub location: Option<String>,
    pub notes: Option<String>,
}

/// Validated job details. Only constructed through [`JobSpec::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDetails {
    pub language: String,
    pub due_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub location: Option<String>,
    pub notes: Option<String>,
}

impl JobSpec {
    pub fn validate(self) -> Result<JobDetails> {
        let language = self
            .language
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .ok_or_else(|| DispatchError::InvalidSpec("language is required".into()))?;
        let due_at = self
            .due_at
            .ok_or_else(|| DispatchError::InvalidSpec("due time is required".into()))?;
        let duration_minutes = match self.duration_minutes {
            Some(0) => {
                return Err(DispatchError::InvalidSpec(
                    "duration must be at least one minute".into(),
                ));
            }
            Some(m) => m,
            None => return Err(DispatchError::InvalidSpec("duration is required".into())),
        };

        Ok(JobDetails {
            language,
            due_at,
            duration_minutes,
            location: self.location.filter(|s| !s.trim().is_empty()),
            notes: self.notes.filter(|s| !s.trim().is_empty()),
        })
    }
}

/// The `(status, epoch)` pair a conditional update is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamp {
    pub status: JobStatus,
    pub epoch: u64,
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.status, self.epoch)
    }
}

/// A dispatched unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    /// Acceptance epoch. Bumped on every entry into `Open` and on acceptance.
    pub epoch: u64,
    /// The customer who created the job.
    pub customer: UserId,
    /// Set exactly while the status is assigned, in-progress or ended.
    pub assigned_worker: Option<UserId>,
    pub details: JobDetails,
    /// Administrator annotations. Required whenever `flagged` is set.
    pub admin_comments: String,
    pub flagged: bool,
    pub manually_handled: bool,
    /// Administrative annotation, set only through overrides.
    pub by_admin: bool,
    /// Worked time reported through a telemetry override.
    pub session_time: Option<Duration>,
    pub customer_no_show: bool,
    /// Statuses the job has left, oldest first.
    pub status_history: Vec<JobStatus>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// A freshly created job: open, first acceptance epoch, nobody assigned.
    pub fn new(customer: UserId, details: JobDetails) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            status: JobStatus::Open,
            epoch: 1,
            customer,
            assigned_worker: None,
            details,
            admin_comments: String::new(),
            flagged: false,
            manually_handled: false,
            by_admin: false,
            session_time: None,
            customer_no_show: false,
            status_history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn stamp(&self) -> Stamp {
        Stamp {
            status: self.status,
            epoch: self.epoch,
        }
    }

    /// Bump `updated_at` after a change.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Both data-model invariants: the worker reference tracks the status,
    /// and a flag always comes with a comment.
    pub fn is_consistent(&self) -> bool {
        self.assigned_worker.is_some() == self.status.holds_worker()
            && (!self.flagged || !self.admin_comments.trim().is_empty())
    }

    /// One-line description used in notification payloads.
    pub fn summary(&self) -> String {
        let mut line = format!(
            "{} job, {} min, due {}",
            self.details.language,
            self.details.duration_minutes,
            self.details.due_at.format("%Y-%m-%d %H:%M UTC")
        );
        if let Some(location) = &self.details.location {
            line.push_str(&format!(" at {location}"));
        }
        line
    }
}

#[cfg(test)]
pub(crate) fn sample_details() -> JobDetails {
    JobSpec {
        language: Some("Swedish".into()),
        due_at: Some(Utc::now() + chrono::Duration::hours(4)),
        duration_minutes: Some(45),
        location: Some("Stockholm".into()),
        notes: None,
    }
    .validate()
    .unwrap()
}
