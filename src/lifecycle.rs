use std::sync::Arc;

use crate::error::Result;
use crate::notify::{Dispatched, FanOut, NotificationKind, Notifier};
use crate::policy::{AccessPolicy, Actor};
use crate::state_machine::{Job, JobId, JobSpec, StateMachine, Transition};
use crate::store::JobStore;

/// Creates jobs and drives every transition except acceptance.
///
/// Each transition runs as one atomic update of the job: the state machine
/// check, the permission check and the write either all happen or none do.
pub struct LifecycleManager<S, N> {
    jobs: Arc<S>,
    fanout: Arc<FanOut<N>>,
    policy: AccessPolicy,
}

impl<S: JobStore, N: Notifier> LifecycleManager<S, N> {
    pub fn new(jobs: Arc<S>, fanout: Arc<FanOut<N>>, policy: AccessPolicy) -> Self {
        Self {
            jobs,
            fanout,
            policy,
        }
    }

    /// Validate, store, then offer the job to the pool. A failed broadcast
    /// leaves the job in place.
    pub async fn create(&self, actor: &Actor, spec: JobSpec) -> Result<Dispatched<Job>> {
        self.policy
            .require(self.policy.can_create(actor), actor, "create jobs")?;
        let details = spec.validate()?;
        let job = Job::new(actor.id, details);
        self.jobs.insert(job.clone())?;
        tracing::info!(
            job_id = %job.id,
            customer = %job.customer,
            language = %job.details.language,
            epoch = job.epoch,
            "Job created"
        );

        let channel = self.fanout.channels().broadcast_channel;
        let notify = self.fanout.broadcast(&job, channel).await;
        Ok(Dispatched::new(job, notify))
    }

    /// assigned → in-progress.
    pub fn start(&self, job_id: JobId, actor: &Actor) -> Result<Job> {
        let (_, job) = self.transition(job_id, actor, Transition::Start, "start this job", |p, a, j| {
            p.can_work_on(a, j)
        })?;
        tracing::info!(job_id = %job.id, worker_id = ?job.assigned_worker, "Job started");
        Ok(job)
    }

    /// in-progress → ended.
    pub fn end(&self, job_id: JobId, actor: &Actor) -> Result<Job> {
        let (_, job) = self.transition(job_id, actor, Transition::End, "end this job", |p, a, j| {
            p.can_work_on(a, j)
        })?;
        tracing::info!(job_id = %job.id, worker_id = ?job.assigned_worker, "Job ended");
        Ok(job)
    }

    /// assigned | in-progress → cancelled. The released worker is told the
    /// job is off; the pool is not re-notified.
    pub async fn cancel(&self, job_id: JobId, actor: &Actor) -> Result<Dispatched<Job>> {
        let (before, job) =
            self.transition(job_id, actor, Transition::Cancel, "cancel this job", |p, a, j| {
                p.can_cancel(a, j)
            })?;
        tracing::info!(job_id = %job.id, cancelled_by = %actor.id, from = %before.status, "Job cancelled");

        let notify = match before.assigned_worker {
            Some(worker) if worker != actor.id => {
                let channel = self.fanout.channels().direct_channel;
                self.fanout
                    .direct(&job, worker, NotificationKind::JobCancelled, channel)
                    .await
            }
            _ => Default::default(),
        };
        Ok(Dispatched::new(job, notify))
    }

    /// ended | cancelled → open, in a new acceptance epoch, and offered to the
    /// pool again.
    pub async fn reopen(&self, job_id: JobId, actor: &Actor) -> Result<Dispatched<Job>> {
        let (_, job) = self.transition(job_id, actor, Transition::Reopen, "reopen this job", |p, a, j| {
            p.can_reopen(a, j)
        })?;
        tracing::info!(job_id = %job.id, epoch = job.epoch, "Job reopened");

        let channel = self.fanout.channels().broadcast_channel;
        let notify = self.fanout.broadcast(&job, channel).await;
        Ok(Dispatched::new(job, notify))
    }

    /// Replace the job's details with a re-validated spec. Status, worker and
    /// epoch stay as they are. A worker holding the job hears about a change
    /// made by someone else.
    pub async fn update_details(
        &self,
        job_id: JobId,
        actor: &Actor,
        spec: JobSpec,
    ) -> Result<Dispatched<Job>> {
        let details = spec.validate()?;
        let mut changed = false;
        let job = self.jobs.update(job_id, |job| {
            self.policy
                .require(self.policy.can_edit(actor, job), actor, "edit this job")?;
            if job.details != details {
                job.details = details;
                job.touch();
                changed = true;
            }
            Ok(())
        })?;
        if !changed {
            return Ok(Dispatched::new(job, Default::default()));
        }
        tracing::info!(job_id = %job.id, edited_by = %actor.id, status = %job.status, "Job details updated");

        let notify = match job.assigned_worker {
            Some(worker) if worker != actor.id => {
                let channel = self.fanout.channels().direct_channel;
                self.fanout
                    .direct(&job, worker, NotificationKind::JobUpdated, channel)
                    .await
            }
            _ => Default::default(),
        };
        Ok(Dispatched::new(job, notify))
    }

    /// Mark that the customer did not show up. Status is left alone and
    /// repeating the call changes nothing.
    pub fn record_customer_no_show(&self, job_id: JobId) -> Result<Job> {
        let job = self.jobs.update(job_id, |job| {
            if !job.customer_no_show {
                job.customer_no_show = true;
                job.touch();
            }
            Ok(())
        })?;
        tracing::info!(job_id = %job.id, status = %job.status, "Customer no-show recorded");
        Ok(job)
    }

    /// Returns the job as it was before and after the transition.
    fn transition<F>(
        &self,
        job_id: JobId,
        actor: &Actor,
        transition: Transition,
        operation: &'static str,
        allowed: F,
    ) -> Result<(Job, Job)>
    where
        F: FnOnce(&AccessPolicy, &Actor, &Job) -> bool,
    {
        let mut before = None;
        let after = self.jobs.update(job_id, |job| {
            StateMachine::check(job, transition)?;
            self.policy
                .require(allowed(&self.policy, actor, job), actor, operation)?;
            before = Some(job.clone());
            StateMachine::apply(job, transition)
        })?;
        // `update` only succeeds after the closure ran to completion.
        let before = before.unwrap_or_else(|| after.clone());
        Ok((before, after))
    }
}
