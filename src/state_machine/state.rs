use serde::{Deserialize, Serialize};

use super::job::{Job, JobStatus, UserId};
use crate::error::{DispatchError, Result};

/// A requested lifecycle move.
///
/// ```text
/// open ──Assign──▶ assigned ──Start──▶ in-progress ──End──▶ ended
///                     │                    │                  │
///                     └──────Cancel────────┴──▶ cancelled     │
///   ▲                                              │          │
///   └──────────────────Reopen──────────────────────┴──────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transition {
    Assign(UserId),
    Start,
    End,
    Cancel,
    Reopen,
}

impl Transition {
    /// The status this transition moves a job into.
    pub fn target(self) -> JobStatus {
        match self {
            Transition::Assign(_) => JobStatus::Assigned,
            Transition::Start => JobStatus::InProgress,
            Transition::End => JobStatus::Ended,
            Transition::Cancel => JobStatus::Cancelled,
            Transition::Reopen => JobStatus::Open,
        }
    }

    /// Whether the transition may be taken from `from`.
    pub fn allowed_from(self, from: JobStatus) -> bool {
        match self {
            Transition::Assign(_) => from == JobStatus::Open,
            Transition::Start => from == JobStatus::Assigned,
            Transition::End => from == JobStatus::InProgress,
            Transition::Cancel => matches!(from, JobStatus::Assigned | JobStatus::InProgress),
            Transition::Reopen => from.is_terminal(),
        }
    }
}

/// Validates and applies lifecycle transitions to a `Job`.
pub struct StateMachine;

impl StateMachine {
    /// Fail with `InvalidTransition` unless `transition` is legal from the
    /// job's current status. Never mutates.
    pub fn check(job: &Job, transition: Transition) -> Result<()> {
        if transition.allowed_from(job.status) {
            Ok(())
        } else {
            Err(DispatchError::InvalidTransition {
                from: job.status,
                to: transition.target(),
            })
        }
    }

    /// Apply the transition in place.
    ///
    /// - `Assign` sets the worker and bumps the epoch, closing the acceptance
    ///   window that was open.
    /// - `Cancel` and `Reopen` release the worker.
    /// - `Reopen` bumps the epoch, opening a new acceptance window.
    ///
    /// On error the job is left untouched.
    pub fn apply(job: &mut Job, transition: Transition) -> Result<()> {
        Self::check(job, transition)?;

        job.status_history.push(job.status);
        job.status = transition.target();
        match transition {
            Transition::Assign(worker) => {
                job.assigned_worker = Some(worker);
                job.epoch += 1;
            }
            Transition::Start | Transition::End => {}
            Transition::Cancel => {
                job.assigned_worker = None;
            }
            Transition::Reopen => {
                job.assigned_worker = None;
                job.epoch += 1;
            }
        }
        job.touch();

        debug_assert!(job.is_consistent());
        Ok(())
    }
}
