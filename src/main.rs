mod cli;
mod ui;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::Parser;

use cli::{Cli, Command};
use jobdispatch::logging;
use jobdispatch::notify::WorkerProfile;
use jobdispatch::{
    Actor, Channel, DispatchConfig, Dispatcher, InMemoryDistanceStore, InMemoryJobStore, JobSpec,
    LogNotifier, OverrideFields, UserId, parse_clock_duration,
};
use ui::RunProgress;

type CliDispatcher = Dispatcher<InMemoryJobStore, InMemoryDistanceStore, LogNotifier>;

const DEMO_CUSTOMER: u64 = 1;
const DEMO_ADMIN: u64 = 2;
const FIRST_WORKER: u64 = 100;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    let config = DispatchConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    tracing::debug!(workers = config.workers.len(), "Configuration loaded");

    match cli.command {
        Command::Demo => run_demo(config).await,
        Command::Race { workers } => run_race(config, workers).await,
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn dispatcher(config: &DispatchConfig) -> CliDispatcher {
    Dispatcher::new(
        InMemoryJobStore::new(),
        InMemoryDistanceStore::new(),
        LogNotifier,
        config,
    )
}

/// Resolve an actor the way the auth layer would hand it over.
fn actor(dispatcher: &CliDispatcher, id: u64, user_type: u32) -> Result<Actor> {
    dispatcher
        .policy()
        .actor(UserId(id), user_type)
        .with_context(|| format!("user type {user_type} is not a configured role"))
}

fn demo_spec() -> JobSpec {
    JobSpec {
        language: Some("Swedish".into()),
        due_at: Some(Utc::now() + Duration::hours(2)),
        duration_minutes: Some(60),
        location: Some("Stockholm".into()),
        notes: Some("Hospital appointment".into()),
    }
}

async fn run_demo(mut config: DispatchConfig) -> Result<()> {
    if config.workers.is_empty() {
        config.workers = (FIRST_WORKER..FIRST_WORKER + 3)
            .map(|id| WorkerProfile::new(UserId(id)))
            .collect();
    }
    let d = dispatcher(&config);
    let customer = actor(&d, DEMO_CUSTOMER, config.roles.customer_role_id)?;
    let admin = actor(&d, DEMO_ADMIN, config.roles.admin_role_id)?;
    let first = actor(&d, config.workers[0].id.0, config.roles.worker_role_id)?;
    let second = match config.workers.get(1) {
        Some(profile) => actor(&d, profile.id.0, config.roles.worker_role_id)?,
        None => actor(&d, first.id.0 + 1, config.roles.worker_role_id)?,
    };

    let progress = RunProgress::start("Running lifecycle demo");

    progress.step("Creating job");
    let created = d.create_job(&customer, demo_spec()).await?;
    progress.done("Job created and offered", &created.value);
    progress.report(&created.notify);
    let job_id = created.value.id;

    progress.step("Listing offers");
    let offered = d.potential_jobs(&first)?;
    progress.step(&format!("{} offer(s) pending for worker {}", offered.len(), first.id));

    let accepted = d.accept_job(job_id, &first).await?;
    progress.done(&format!("Worker {} accepted", first.id), &accepted.value);
    progress.report(&accepted.notify);

    match d.accept_job(job_id, &second).await {
        Ok(_) => anyhow::bail!("second acceptance of {job_id} should have lost"),
        Err(err) => progress.refused(&format!("Worker {} was too late", second.id), &err),
    }

    let edited = d
        .update_job(
            job_id,
            &customer,
            JobSpec {
                notes: Some("Hospital appointment, entrance B".into()),
                ..demo_spec()
            },
        )
        .await?;
    progress.done("Customer edited the details", &edited.value);
    progress.report(&edited.notify);

    let reminder = d.resend_notification(job_id, Channel::Sms).await?;
    progress.step("Reminder sent");
    progress.report(&reminder);

    let started = d.start_job(job_id, &first)?;
    progress.done("Job started", &started);
    let ended = d.end_job(job_id, &first)?;
    progress.done("Job ended", &ended);

    let fields = OverrideFields {
        distance: Some(15.2),
        time: parse_clock_duration("00:32:10"),
        admin_comments: Some("travel corrected by office".into()),
        ..Default::default()
    };
    if d.apply_telemetry_override(job_id, &fields)? {
        progress.done("Telemetry corrected", &d.get_job(job_id)?);
    }

    let flag_only = OverrideFields {
        flagged: Some(true),
        ..Default::default()
    };
    if let Err(err) = d.apply_telemetry_override(job_id, &flag_only) {
        progress.refused("Flag without a comment", &err);
    }

    let reopened = d.reopen_job(job_id, &admin).await?;
    progress.done("Job reopened", &reopened.value);
    progress.report(&reopened.notify);

    let retaken = d.accept_any_open_job(&second, &[job_id]).await?;
    progress.done(&format!("Worker {} took the reopened job", second.id), &retaken.value);

    let cancelled = d.cancel_job(job_id, &customer).await?;
    progress.done("Customer cancelled", &cancelled.value);
    progress.report(&cancelled.notify);

    let history = d.job_history(&customer, customer.id)?;
    progress.finish(&format!("Demo complete, {} job(s) in customer history", history.len()));

    progress.dump("Final job", &d.get_job(job_id)?);
    if let Some(record) = jobdispatch::DistanceStore::get(d.distances(), job_id)? {
        progress.dump("Distance record", &record);
    }
    Ok(())
}

async fn run_race(mut config: DispatchConfig, workers: u64) -> Result<()> {
    config.workers = (FIRST_WORKER..FIRST_WORKER + workers)
        .map(|id| WorkerProfile::new(UserId(id)))
        .collect();
    let d = Arc::new(dispatcher(&config));
    let customer = actor(&d, DEMO_CUSTOMER, config.roles.customer_role_id)?;

    let progress = RunProgress::start(&format!("Racing {workers} workers"));
    let job = d.create_job(&customer, demo_spec()).await?.into_inner();
    progress.done("Job created", &job);

    let job_id = job.id;
    let mut attempts = Vec::with_capacity(config.workers.len());
    for profile in &config.workers {
        let worker = actor(&d, profile.id.0, config.roles.worker_role_id)?;
        let d = Arc::clone(&d);
        attempts.push(tokio::spawn(async move {
            (worker, d.accept_job(job_id, &worker).await)
        }));
    }

    let mut winner = None;
    let mut losers = 0usize;
    for attempt in attempts {
        let (worker, outcome) = attempt.await.context("acceptance task panicked")?;
        match outcome {
            Ok(won) => winner = Some((worker, won.value)),
            Err(jobdispatch::DispatchError::AlreadyAssigned(_)) => losers += 1,
            Err(err) => progress.failed(&format!("Worker {}", worker.id), &err),
        }
    }

    let (worker, job) = winner.context("no worker won the race")?;
    progress.done(&format!("Worker {} won", worker.id), &job);
    progress.finish(&format!("1 winner, {losers} worker(s) got AlreadyAssigned"));
    Ok(())
}
