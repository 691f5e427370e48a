use std::sync::Arc;

use crate::acceptance::AcceptanceCoordinator;
use crate::config::DispatchConfig;
use crate::error::{DispatchError, Result};
use crate::lifecycle::LifecycleManager;
use crate::notify::{
    Channel, DeliveryReport, Dispatched, FanOut, NotificationKind, Notifier, WorkerProfile,
    WorkerRoster,
};
use crate::policy::{AccessPolicy, Actor};
use crate::state_machine::{Job, JobId, JobSpec, JobStatus, UserId};
use crate::store::{DistanceStore, JobFilter, JobStore};
use crate::telemetry::{OverrideFields, TelemetryHandler};

/// Entry point for every job operation.
///
/// Callers hand in an already-authenticated [`Actor`]; the dispatcher routes
/// the request to the lifecycle manager, the acceptance coordinator or the
/// telemetry handler and answers the read-only queries itself.
pub struct Dispatcher<S, D, N> {
    jobs: Arc<S>,
    fanout: Arc<FanOut<N>>,
    policy: AccessPolicy,
    lifecycle: LifecycleManager<S, N>,
    acceptance: AcceptanceCoordinator<S, N>,
    telemetry: TelemetryHandler<Arc<S>, D>,
}

impl<S: JobStore, D: DistanceStore, N: Notifier> Dispatcher<S, D, N> {
    /// Wire the components together. The roster is seeded from
    /// `config.workers` and roles are resolved from `config.roles`.
    pub fn new(jobs: S, distances: D, notifier: N, config: &DispatchConfig) -> Self {
        let jobs = Arc::new(jobs);
        let mut roster = WorkerRoster::new();
        for profile in &config.workers {
            roster.register(profile.clone());
        }
        let fanout = Arc::new(FanOut::new(
            notifier,
            roster,
            config.notifications.clone(),
        ));
        let policy = config.access_policy();

        Self {
            lifecycle: LifecycleManager::new(jobs.clone(), fanout.clone(), policy.clone()),
            acceptance: AcceptanceCoordinator::new(jobs.clone(), fanout.clone(), policy.clone()),
            telemetry: TelemetryHandler::new(jobs.clone(), distances),
            jobs,
            fanout,
            policy,
        }
    }

    /// The role table the dispatcher was built with, for resolving actors.
    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    pub fn distances(&self) -> &D {
        self.telemetry.distances()
    }

    /// Validate and store a new open job, then offer it to eligible workers.
    pub async fn create_job(&self, customer: &Actor, spec: JobSpec) -> Result<Dispatched<Job>> {
        self.lifecycle.create(customer, spec).await
    }

    /// Replace the details of an existing job. Allowed for the owning
    /// customer and administrators, in any status.
    pub async fn update_job(
        &self,
        job_id: JobId,
        actor: &Actor,
        spec: JobSpec,
    ) -> Result<Dispatched<Job>> {
        self.lifecycle.update_details(job_id, actor, spec).await
    }

    /// Jobs visible to `actor`, narrowed by `filter`.
    ///
    /// Elevated actors see everything. Workers see the jobs they hold and the
    /// open jobs currently offered to them.
    pub fn list_jobs(&self, actor: &Actor, filter: &JobFilter) -> Result<Vec<Job>> {
        self.policy
            .require(self.policy.can_list_jobs(actor), actor, "list jobs")?;
        let jobs = self.jobs.find(filter)?;
        if actor.is_elevated() {
            return Ok(jobs);
        }

        let offers = self.fanout.offers();
        Ok(jobs
            .into_iter()
            .filter(|job| {
                job.assigned_worker == Some(actor.id)
                    || (job.status == JobStatus::Open
                        && offers.is_offered(job.id, job.epoch, actor.id))
            })
            .collect())
    }

    /// Current state of one job. No permission check.
    pub fn get_job(&self, job_id: JobId) -> Result<Job> {
        self.jobs.get(job_id)?.ok_or(DispatchError::NotFound(job_id))
    }

    /// First acceptance of the open epoch wins; later ones get
    /// `AlreadyAssigned`.
    pub async fn accept_job(&self, job_id: JobId, worker: &Actor) -> Result<Dispatched<Job>> {
        self.acceptance.accept(job_id, worker).await
    }

    /// Take the first candidate that can still be won. See
    /// [`Dispatcher::potential_jobs`] for a ready-made candidate list.
    pub async fn accept_any_open_job(
        &self,
        worker: &Actor,
        candidates: &[JobId],
    ) -> Result<Dispatched<Job>> {
        self.acceptance.accept_any(worker, candidates).await
    }

    pub fn start_job(&self, job_id: JobId, actor: &Actor) -> Result<Job> {
        self.lifecycle.start(job_id, actor)
    }

    pub fn end_job(&self, job_id: JobId, actor: &Actor) -> Result<Job> {
        self.lifecycle.end(job_id, actor)
    }

    pub async fn cancel_job(&self, job_id: JobId, actor: &Actor) -> Result<Dispatched<Job>> {
        self.lifecycle.cancel(job_id, actor).await
    }

    /// Put an ended or cancelled job back on offer in a new epoch.
    pub async fn reopen_job(&self, job_id: JobId, actor: &Actor) -> Result<Dispatched<Job>> {
        self.lifecycle.reopen(job_id, actor).await
    }

    pub fn record_customer_no_show(&self, job_id: JobId) -> Result<Job> {
        self.lifecycle.record_customer_no_show(job_id)
    }

    /// Returns whether anything was written.
    pub fn apply_telemetry_override(&self, job_id: JobId, fields: &OverrideFields) -> Result<bool> {
        self.telemetry.apply(job_id, fields)
    }

    /// Send the job out again on `channel`.
    ///
    /// A job with a worker gets a reminder to that worker; an open job is
    /// re-broadcast within its current epoch. A cancelled job reaches no one.
    /// Job state is never touched.
    pub async fn resend_notification(&self, job_id: JobId, channel: Channel) -> Result<DeliveryReport> {
        let job = self.get_job(job_id)?;
        let report = match (job.assigned_worker, job.status) {
            (Some(worker), _) => {
                self.fanout
                    .direct(&job, worker, NotificationKind::Reminder, channel)
                    .await
            }
            (None, JobStatus::Open) => self.fanout.broadcast(&job, channel).await,
            (None, _) => DeliveryReport::default(),
        };
        tracing::debug!(
            job_id = %job_id,
            channel = %channel,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "Notification resent"
        );
        Ok(report)
    }

    /// Open jobs with a live offer naming `worker`, oldest first.
    pub fn potential_jobs(&self, worker: &Actor) -> Result<Vec<Job>> {
        self.policy
            .require(self.policy.can_accept(worker), worker, "look for jobs")?;

        let mut jobs = Vec::new();
        for (job_id, epoch) in self.fanout.offers().offered_to(worker.id) {
            let Some(job) = self.jobs.get(job_id)? else {
                continue;
            };
            if job.status == JobStatus::Open && job.epoch == epoch {
                jobs.push(job);
            }
        }
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(jobs)
    }

    /// Ended and cancelled jobs in which `user` was the customer or the
    /// assigned worker.
    pub fn job_history(&self, actor: &Actor, user: UserId) -> Result<Vec<Job>> {
        self.policy.require(
            self.policy.can_view_history(actor, user),
            actor,
            "view this history",
        )?;
        let filter = JobFilter::default()
            .with_status(JobStatus::Ended)
            .with_status(JobStatus::Cancelled);
        Ok(self
            .jobs
            .find(&filter)?
            .into_iter()
            .filter(|job| job.customer == user || job.assigned_worker == Some(user))
            .collect())
    }

    pub fn register_worker(&self, profile: WorkerProfile) {
        self.fanout.register_worker(profile);
    }

    pub fn deregister_worker(&self, id: UserId) -> bool {
        self.fanout.deregister_worker(id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::config::RoleConfig;
    use crate::notify::testing::RecordingNotifier;
    use crate::policy::Role;
    use crate::store::{InMemoryDistanceStore, InMemoryJobStore};
    use crate::telemetry::parse_clock_duration;

    type TestDispatcher = Dispatcher<InMemoryJobStore, InMemoryDistanceStore, Arc<RecordingNotifier>>;

    const CUSTOMER: u64 = 1;
    const ADMIN: u64 = 9;

    fn config(workers: &[u64]) -> DispatchConfig {
        DispatchConfig {
            workers: workers.iter().map(|id| WorkerProfile::new(UserId(*id))).collect(),
            ..Default::default()
        }
    }

    fn dispatcher_with(notifier: RecordingNotifier, config: &DispatchConfig) -> (TestDispatcher, Arc<RecordingNotifier>) {
        let notifier = Arc::new(notifier);
        let dispatcher = Dispatcher::new(
            InMemoryJobStore::new(),
            InMemoryDistanceStore::new(),
            notifier.clone(),
            config,
        );
        (dispatcher, notifier)
    }

    fn dispatcher(workers: &[u64]) -> (TestDispatcher, Arc<RecordingNotifier>) {
        dispatcher_with(RecordingNotifier::new(), &config(workers))
    }

    fn spec(language: &str) -> JobSpec {
        JobSpec {
            language: Some(language.into()),
            due_at: Some(Utc::now()),
            duration_minutes: Some(45),
            location: Some("Göteborg".into()),
            ..Default::default()
        }
    }

    async fn open_job(d: &TestDispatcher) -> Job {
        d.create_job(&Actor::customer(CUSTOMER), spec("Swedish"))
            .await
            .unwrap()
            .into_inner()
    }

    #[tokio::test]
    async fn full_lifecycle_then_reopen() {
        let (d, notifier) = dispatcher(&[20, 21]);
        let job = open_job(&d).await;
        assert_eq!(job.status, JobStatus::Open);
        assert_eq!(job.epoch, 1);
        assert!(job.assigned_worker.is_none());

        let worker = Actor::worker(20);
        let accepted = d.accept_job(job.id, &worker).await.unwrap();
        assert_eq!(accepted.value.status, JobStatus::Assigned);
        assert_eq!(accepted.value.epoch, 2);
        assert_eq!(notifier.kinds_for(UserId(21)).last(), Some(&NotificationKind::JobTaken));

        d.start_job(job.id, &worker).unwrap();
        let ended = d.end_job(job.id, &worker).unwrap();
        assert_eq!(ended.status, JobStatus::Ended);
        assert!(ended.is_consistent());

        let reopened = d.reopen_job(job.id, &Actor::admin(ADMIN)).await.unwrap();
        assert_eq!(reopened.value.status, JobStatus::Open);
        assert!(reopened.value.assigned_worker.is_none());
        assert!(reopened.value.epoch > ended.epoch);
        assert_eq!(
            reopened.value.status_history,
            vec![
                JobStatus::Open,
                JobStatus::Assigned,
                JobStatus::InProgress,
                JobStatus::Ended,
            ]
        );

        let again = d.accept_job(job.id, &Actor::worker(21)).await.unwrap();
        assert_eq!(again.value.assigned_worker, Some(UserId(21)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn two_workers_race_for_one_job() {
        let (d, _) = dispatcher(&[20, 21]);
        let d = Arc::new(d);
        let job = open_job(&d).await;
        let job_id = job.id;

        let (a, b) = tokio::join!(
            {
                let d = d.clone();
                tokio::spawn(async move { d.accept_job(job_id, &Actor::worker(20)).await })
            },
            {
                let d = d.clone();
                tokio::spawn(async move { d.accept_job(job_id, &Actor::worker(21)).await })
            },
        );
        let results = [a.unwrap(), b.unwrap()];

        let wins = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1);
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(DispatchError::AlreadyAssigned(id)) if *id == job.id))
        );
        assert_eq!(d.get_job(job.id).unwrap().epoch, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn offers_never_outlive_acceptance_during_creation() {
        let (d, _) = dispatcher(&[20, 21]);
        let d = Arc::new(d);
        let creating = Arc::new(AtomicBool::new(true));

        let acceptor = {
            let d = d.clone();
            let creating = creating.clone();
            tokio::spawn(async move {
                let open = JobFilter::default().with_status(JobStatus::Open);
                loop {
                    let still_creating = creating.load(Ordering::SeqCst);
                    let jobs = d.list_jobs(&Actor::admin(ADMIN), &open).unwrap();
                    if !still_creating && jobs.is_empty() {
                        break;
                    }
                    for job in jobs {
                        d.accept_job(job.id, &Actor::worker(20)).await.unwrap();
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut created = Vec::new();
        for _ in 0..300 {
            created.push(open_job(&d).await.id);
        }
        creating.store(false, Ordering::SeqCst);
        acceptor.await.unwrap();

        for id in created {
            let job = d.get_job(id).unwrap();
            assert_eq!(job.status, JobStatus::Assigned);
            assert!(!d.fanout.offers().is_live(id, 1));
        }
        assert_eq!(d.fanout.offers().live_count(), 0);
        assert!(d.potential_jobs(&Actor::worker(21)).unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_job_edits_details_only() {
        let (d, notifier) = dispatcher(&[20, 21]);
        let job = open_job(&d).await;
        d.accept_job(job.id, &Actor::worker(20)).await.unwrap();
        let before = d.get_job(job.id).unwrap();

        let edit = JobSpec {
            notes: Some("Ring the bell twice".into()),
            ..spec("Swedish")
        };
        let updated = d
            .update_job(job.id, &Actor::customer(CUSTOMER), edit)
            .await
            .unwrap();
        assert_eq!(updated.value.details.notes.as_deref(), Some("Ring the bell twice"));
        assert_eq!(updated.value.status, before.status);
        assert_eq!(updated.value.epoch, before.epoch);
        assert_eq!(updated.value.assigned_worker, before.assigned_worker);
        assert_eq!(updated.value.status_history, before.status_history);
        assert_eq!(
            notifier.kinds_for(UserId(20)).last(),
            Some(&NotificationKind::JobUpdated)
        );
        assert!(!notifier.kinds_for(UserId(21)).contains(&NotificationKind::JobUpdated));

        let err = d
            .update_job(job.id, &Actor::customer(2), spec("Swedish"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Unauthorized { .. }));
        let err = d
            .update_job(job.id, &Actor::admin(ADMIN), JobSpec::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidSpec(_)));
        assert_eq!(d.get_job(job.id).unwrap(), updated.value);
    }

    #[tokio::test]
    async fn list_jobs_scopes_by_role() {
        let (d, _) = dispatcher(&[20, 21]);
        let mine = open_job(&d).await;
        let offered = open_job(&d).await;
        d.accept_job(mine.id, &Actor::worker(20)).await.unwrap();

        let all = d.list_jobs(&Actor::admin(ADMIN), &JobFilter::default()).unwrap();
        assert_eq!(all.len(), 2);

        let for_20 = d.list_jobs(&Actor::worker(20), &JobFilter::default()).unwrap();
        assert_eq!(for_20.len(), 2);
        assert!(for_20.iter().any(|j| j.id == mine.id));
        assert!(for_20.iter().any(|j| j.id == offered.id));

        // 21 lost `mine` and still has `offered` on the table.
        let for_21 = d.list_jobs(&Actor::worker(21), &JobFilter::default()).unwrap();
        assert_eq!(for_21.iter().map(|j| j.id).collect::<Vec<_>>(), vec![offered.id]);

        let open_only = d
            .list_jobs(&Actor::worker(20), &JobFilter::default().with_status(JobStatus::Open))
            .unwrap();
        assert_eq!(open_only.len(), 1);

        let err = d
            .list_jobs(&Actor::customer(CUSTOMER), &JobFilter::default())
            .unwrap_err();
        assert!(matches!(err, DispatchError::Unauthorized { .. }));
    }

    #[tokio::test]
    async fn potential_jobs_feed_accept_any() {
        let (d, _) = dispatcher(&[20, 21]);
        let first = open_job(&d).await;
        let second = open_job(&d).await;
        d.accept_job(first.id, &Actor::worker(20)).await.unwrap();

        let worker = Actor::worker(21);
        let candidates: Vec<JobId> = d
            .potential_jobs(&worker)
            .unwrap()
            .iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(candidates, vec![second.id]);

        let won = d.accept_any_open_job(&worker, &candidates).await.unwrap();
        assert_eq!(won.value.id, second.id);
        assert!(d.potential_jobs(&worker).unwrap().is_empty());
        assert_eq!(
            d.accept_any_open_job(&worker, &candidates).await.unwrap_err(),
            DispatchError::NoJobAvailable
        );
    }

    #[tokio::test]
    async fn history_holds_terminal_jobs_of_user() {
        let (d, _) = dispatcher(&[20]);
        let done = open_job(&d).await;
        let worker = Actor::worker(20);
        d.accept_job(done.id, &worker).await.unwrap();
        d.start_job(done.id, &worker).unwrap();
        d.end_job(done.id, &worker).unwrap();
        let still_open = open_job(&d).await;

        let history = d.job_history(&worker, UserId(20)).unwrap();
        assert_eq!(history.iter().map(|j| j.id).collect::<Vec<_>>(), vec![done.id]);

        let customer = Actor::customer(CUSTOMER);
        let history = d.job_history(&customer, UserId(CUSTOMER)).unwrap();
        assert!(history.iter().all(|j| j.id != still_open.id));
        assert_eq!(history.len(), 1);

        let err = d.job_history(&Actor::customer(2), UserId(CUSTOMER)).unwrap_err();
        assert!(matches!(err, DispatchError::Unauthorized { .. }));
        assert_eq!(d.job_history(&Actor::admin(ADMIN), UserId(20)).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn resend_targets_worker_or_pool() {
        let (d, notifier) = dispatcher(&[20, 21]);
        let job = open_job(&d).await;

        let report = d.resend_notification(job.id, Channel::Sms).await.unwrap();
        assert_eq!(report.delivered, vec![UserId(20), UserId(21)]);

        d.accept_job(job.id, &Actor::worker(20)).await.unwrap();
        let before = d.get_job(job.id).unwrap();
        let report = d.resend_notification(job.id, Channel::Sms).await.unwrap();
        assert_eq!(report.delivered, vec![UserId(20)]);
        assert_eq!(notifier.kinds_for(UserId(20)).last(), Some(&NotificationKind::Reminder));
        assert_eq!(d.get_job(job.id).unwrap(), before);

        d.cancel_job(job.id, &Actor::customer(CUSTOMER)).await.unwrap();
        let report = d.resend_notification(job.id, Channel::Push).await.unwrap();
        assert!(report.is_empty());
        assert!(!report.is_success());

        let unknown = JobId::new();
        assert_eq!(
            d.resend_notification(unknown, Channel::Push).await.unwrap_err(),
            DispatchError::NotFound(unknown)
        );
    }

    #[tokio::test]
    async fn failing_notifier_never_fails_an_operation() {
        let (d, _) = dispatcher_with(RecordingNotifier::failing(), &config(&[20, 21]));
        let created = d
            .create_job(&Actor::customer(CUSTOMER), spec("Swedish"))
            .await
            .unwrap();
        assert!(!created.notify.is_success());

        let accepted = d.accept_job(created.value.id, &Actor::worker(20)).await.unwrap();
        assert_eq!(accepted.value.status, JobStatus::Assigned);
        assert_eq!(accepted.notify.failed.len(), 2);

        let cancelled = d
            .cancel_job(created.value.id, &Actor::admin(ADMIN))
            .await
            .unwrap();
        assert_eq!(cancelled.value.status, JobStatus::Cancelled);
        assert_eq!(cancelled.notify.failed.len(), 1);
    }

    #[tokio::test]
    async fn overrides_apply_in_any_status() {
        let (d, _) = dispatcher(&[20]);
        let job = open_job(&d).await;
        let worker = Actor::worker(20);
        d.accept_job(job.id, &worker).await.unwrap();
        d.start_job(job.id, &worker).unwrap();
        d.end_job(job.id, &worker).unwrap();

        let changed = d
            .apply_telemetry_override(
                job.id,
                &OverrideFields {
                    distance: Some(15.2),
                    time: parse_clock_duration("00:32:10"),
                    admin_comments: Some(String::new()),
                    flagged: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(changed);
        let record = d.distances().get(job.id).unwrap().unwrap();
        assert_eq!(record.time, Some(Duration::from_secs(1930)));
        let stored = d.get_job(job.id).unwrap();
        assert_eq!(stored.status, JobStatus::Ended);
        assert_eq!(stored.assigned_worker, Some(UserId(20)));

        assert_eq!(
            d.apply_telemetry_override(
                job.id,
                &OverrideFields {
                    flagged: Some(true),
                    admin_comments: Some(String::new()),
                    ..Default::default()
                },
            )
            .unwrap_err(),
            DispatchError::MissingComment
        );
        assert!(!d.get_job(job.id).unwrap().flagged);
    }

    #[tokio::test]
    async fn end_on_open_job_leaves_it_untouched() {
        let (d, _) = dispatcher(&[20]);
        let job = open_job(&d).await;

        let err = d.end_job(job.id, &Actor::admin(ADMIN)).unwrap_err();
        assert_eq!(
            err,
            DispatchError::InvalidTransition {
                from: JobStatus::Open,
                to: JobStatus::Ended
            }
        );
        assert_eq!(d.get_job(job.id).unwrap(), job);
        assert!(d.record_customer_no_show(job.id).unwrap().customer_no_show);
    }

    #[tokio::test]
    async fn roster_changes_shape_broadcasts() {
        let (d, _) = dispatcher(&[20]);
        d.register_worker(WorkerProfile::new(UserId(30)).with_language("Finnish"));

        let finnish = d
            .create_job(&Actor::customer(CUSTOMER), spec("finnish"))
            .await
            .unwrap();
        assert_eq!(finnish.notify.delivered, vec![UserId(20), UserId(30)]);

        let swedish = d
            .create_job(&Actor::customer(CUSTOMER), spec("Swedish"))
            .await
            .unwrap();
        assert_eq!(swedish.notify.delivered, vec![UserId(20)]);

        assert!(d.deregister_worker(UserId(20)));
        assert!(!d.deregister_worker(UserId(20)));
        let report = d.resend_notification(swedish.value.id, Channel::Push).await.unwrap();
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn configured_role_ids_resolve_actors() {
        let config = DispatchConfig {
            roles: RoleConfig {
                super_admin_role_id: 7,
                admin_role_id: 8,
                customer_role_id: 5,
                worker_role_id: 6,
            },
            ..config(&[20])
        };
        let (d, _) = dispatcher_with(RecordingNotifier::new(), &config);

        let customer = d.policy().actor(UserId(CUSTOMER), 5).unwrap();
        assert_eq!(customer.role, Role::Customer);
        let job = d.create_job(&customer, spec("Swedish")).await.unwrap().value;

        let admin = d.policy().actor(UserId(ADMIN), 8).unwrap();
        assert_eq!(d.list_jobs(&admin, &JobFilter::default()).unwrap().len(), 1);
        assert!(d.policy().actor(UserId(2), 4).is_none());
        assert_eq!(d.get_job(job.id).unwrap().customer, UserId(CUSTOMER));
    }
}
