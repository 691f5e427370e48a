//! After-the-fact corrections: distance/time telemetry and admin annotations.
//!
//! These writes bypass the lifecycle state machine entirely. They may target a
//! job in any status and never touch `status`, `epoch` or `assigned_worker`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};
use crate::state_machine::JobId;
use crate::store::{DistanceStore, JobStore};

/// Fields of one override request. `None` means "leave as is".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverrideFields {
    pub distance: Option<f64>,
    pub time: Option<Duration>,
    pub session_time: Option<Duration>,
    pub admin_comments: Option<String>,
    pub flagged: Option<bool>,
    pub manually_handled: Option<bool>,
    pub by_admin: Option<bool>,
}

impl OverrideFields {
    /// Comment text, if any non-blank comment was supplied.
    fn comment(&self) -> Option<&str> {
        self.admin_comments
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    fn touches_distance(&self) -> bool {
        self.distance.is_some() || self.time.is_some()
    }

    fn touches_job(&self) -> bool {
        self.comment().is_some()
            || self.session_time.is_some()
            || self.flagged.is_some()
            || self.manually_handled.is_some()
            || self.by_admin.is_some()
    }

    /// A flag must arrive together with its justification.
    fn validate(&self) -> Result<()> {
        if self.flagged == Some(true) && self.comment().is_none() {
            return Err(DispatchError::MissingComment);
        }
        Ok(())
    }
}

/// Parse `HH:MM:SS`, `MM:SS` or a plain number of seconds.
pub fn parse_clock_duration(input: &str) -> Option<Duration> {
    let parts: Vec<&str> = input.trim().split(':').collect();
    if parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
        return None;
    }
    let mut secs: u64 = 0;
    for (i, part) in parts.iter().enumerate() {
        let value: u64 = part.parse().ok()?;
        // Minutes and seconds after the leading field must be below 60.
        if i > 0 && value >= 60 {
            return None;
        }
        secs = secs.checked_mul(60)?.checked_add(value)?;
    }
    Some(Duration::from_secs(secs))
}

/// Applies [`OverrideFields`] to the job and distance stores.
pub struct TelemetryHandler<S, D> {
    jobs: S,
    distances: D,
}

impl<S: JobStore, D: DistanceStore> TelemetryHandler<S, D> {
    pub fn new(jobs: S, distances: D) -> Self {
        Self { jobs, distances }
    }

    pub fn distances(&self) -> &D {
        &self.distances
    }

    /// Returns `Ok(true)` if anything was written, `Ok(false)` if every field
    /// was absent or blank.
    ///
    /// Both writes happen under the job's lock. The distance record is written
    /// last inside the update, so a failed distance write leaves the job as it
    /// was.
    pub fn apply(&self, job_id: JobId, fields: &OverrideFields) -> Result<bool> {
        fields.validate()?;
        let (touches_distance, touches_job) = (fields.touches_distance(), fields.touches_job());
        if !touches_distance && !touches_job {
            return match self.jobs.get(job_id)? {
                Some(_) => Ok(false),
                None => Err(DispatchError::NotFound(job_id)),
            };
        }

        self.jobs.update(job_id, |job| {
            if touches_job {
                if let Some(comment) = fields.comment() {
                    job.admin_comments = comment.to_string();
                }
                if let Some(session) = fields.session_time {
                    job.session_time = Some(session);
                }
                if let Some(flagged) = fields.flagged {
                    job.flagged = flagged;
                }
                if let Some(manual) = fields.manually_handled {
                    job.manually_handled = manual;
                }
                if let Some(by_admin) = fields.by_admin {
                    job.by_admin = by_admin;
                }
                job.touch();
            }
            if touches_distance {
                self.distances
                    .upsert(job_id, fields.distance, fields.time)?;
            }
            Ok(())
        })?;

        tracing::info!(
            job_id = %job_id,
            distance = ?fields.distance,
            flagged = ?fields.flagged,
            "Override applied"
        );
        Ok(true)
    }
}
