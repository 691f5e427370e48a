//! First-accept-wins assignment.
//!
//! An attempt reads the job's `(status, epoch)`, builds the assigned version,
//! and writes it with a compare-and-swap keyed on what it read. Of all the
//! attempts that read the same open epoch, exactly one swap lands; the rest
//! see a conflict and fail with `AlreadyAssigned`. Nothing is retried.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{DispatchError, Result};
use crate::notify::{DeliveryReport, Dispatched, FanOut, NotificationKind, Notifier};
use crate::policy::{AccessPolicy, Actor};
use crate::state_machine::{Job, JobId, JobStatus, StateMachine, Transition, UserId};
use crate::store::{CasOutcome, JobStore};

/// One worker's try at one job. Lives only for the duration of the attempt.
#[derive(Debug, Clone, Copy)]
struct AcceptanceAttempt {
    job_id: JobId,
    worker: UserId,
    at: DateTime<Utc>,
}

pub struct AcceptanceCoordinator<S, N> {
    jobs: Arc<S>,
    fanout: Arc<FanOut<N>>,
    policy: AccessPolicy,
}

impl<S: JobStore, N: Notifier> AcceptanceCoordinator<S, N> {
    pub fn new(jobs: Arc<S>, fanout: Arc<FanOut<N>>, policy: AccessPolicy) -> Self {
        Self {
            jobs,
            fanout,
            policy,
        }
    }

    /// Accept `job_id` on behalf of `worker`.
    pub async fn accept(&self, job_id: JobId, worker: &Actor) -> Result<Dispatched<Job>> {
        self.policy
            .require(self.policy.can_accept(worker), worker, "accept jobs")?;
        let (offer_epoch, job) = self.claim(job_id, worker.id)?;
        let notify = self.announce(&job, offer_epoch).await;
        Ok(Dispatched::new(job, notify))
    }

    /// Try each candidate once, in order, and keep the first win.
    ///
    /// Candidates that are gone, taken or not open are skipped. Store failures
    /// end the pass immediately.
    pub async fn accept_any(&self, worker: &Actor, candidates: &[JobId]) -> Result<Dispatched<Job>> {
        self.policy
            .require(self.policy.can_accept(worker), worker, "accept jobs")?;

        for &job_id in candidates {
            match self.claim(job_id, worker.id) {
                Ok((offer_epoch, job)) => {
                    let notify = self.announce(&job, offer_epoch).await;
                    return Ok(Dispatched::new(job, notify));
                }
                Err(
                    DispatchError::AlreadyAssigned(_)
                    | DispatchError::NotFound(_)
                    | DispatchError::InvalidTransition { .. },
                ) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(DispatchError::NoJobAvailable)
    }

    /// The conditional update. Returns the epoch the job was open in together
    /// with the stored, assigned job.
    fn claim(&self, job_id: JobId, worker: UserId) -> Result<(u64, Job)> {
        let attempt = AcceptanceAttempt {
            job_id,
            worker,
            at: Utc::now(),
        };

        let snapshot = self
            .jobs
            .get(job_id)?
            .ok_or(DispatchError::NotFound(job_id))?;
        match snapshot.status {
            JobStatus::Open => {}
            JobStatus::Cancelled => {
                return Err(DispatchError::InvalidTransition {
                    from: JobStatus::Cancelled,
                    to: JobStatus::Assigned,
                });
            }
            JobStatus::Assigned | JobStatus::InProgress | JobStatus::Ended => {
                return Err(DispatchError::AlreadyAssigned(job_id));
            }
        }

        let expected = snapshot.stamp();
        let mut next = snapshot;
        StateMachine::apply(&mut next, Transition::Assign(attempt.worker))?;

        match self.jobs.compare_and_swap(job_id, expected, next)? {
            CasOutcome::Swapped(job) => {
                tracing::info!(
                    job_id = %attempt.job_id,
                    worker_id = %attempt.worker,
                    epoch = job.epoch,
                    attempted_at = %attempt.at,
                    "Job assigned"
                );
                Ok((expected.epoch, job))
            }
            CasOutcome::Conflict(_) => Err(DispatchError::AlreadyAssigned(job_id)),
        }
    }

    /// Close the offer for the epoch the job was won in, tell the other
    /// recipients it is gone and confirm with the winner.
    async fn announce(&self, job: &Job, offer_epoch: u64) -> DeliveryReport {
        let Some(winner) = job.assigned_worker else {
            return DeliveryReport::default();
        };
        let channel = self.fanout.channels().direct_channel;
        let (confirmed, taken) = tokio::join!(
            self.fanout
                .direct(job, winner, NotificationKind::AssignmentConfirmed, channel),
            self.fanout.supersede(job, offer_epoch, winner),
        );
        confirmed.merge(taken)
    }
}
