//! Notification seam and broadcast fan-out.
//!
//! The coordinator never waits on delivery for correctness: every send
//! happens after the state change it announces, and its outcome is reported
//! back as a [`DeliveryReport`] next to the result.

mod fanout;
mod offers;
mod roster;
#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use fanout::FanOut;
pub use offers::OfferBook;
pub use roster::{WorkerProfile, WorkerRoster};

use crate::state_machine::{Job, JobId, UserId};

/// Transport a message travels over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Push,
    Sms,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Push => write!(f, "push"),
            Channel::Sms => write!(f, "sms"),
        }
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "push" => Ok(Channel::Push),
            "sms" => Ok(Channel::Sms),
            other => Err(format!("unknown channel: {other}")),
        }
    }
}

/// What a message tells its recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A job is open and the recipient may accept it.
    NewJob,
    /// The job the recipient was offered has been taken by someone else.
    JobTaken,
    /// The recipient won the job.
    AssignmentConfirmed,
    /// The job the recipient held was cancelled.
    JobCancelled,
    /// Details of the job the recipient holds were edited.
    JobUpdated,
    /// Re-sent on request; carries the job as it stands.
    Reminder,
}

/// Who an envelope is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipients {
    /// A single worker, usually the assignee.
    Worker(UserId),
    /// Every worker an offer went out to.
    Eligible(Vec<UserId>),
}

impl Recipients {
    pub fn ids(&self) -> &[UserId] {
        match self {
            Recipients::Worker(id) => std::slice::from_ref(id),
            Recipients::Eligible(ids) => ids,
        }
    }
}

/// What gets handed to the transport. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub job_id: JobId,
    pub recipients: Recipients,
    pub channel: Channel,
    pub kind: NotificationKind,
    pub summary: String,
}

impl Envelope {
    pub fn new(job: &Job, recipients: Recipients, channel: Channel, kind: NotificationKind) -> Self {
        Self {
            job_id: job.id,
            recipients,
            channel,
            kind,
            summary: job.summary(),
        }
    }
}

/// Why a single send failed. Never escapes the fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    #[error("no {channel} contact registered for user {recipient}")]
    NoContact { recipient: UserId, channel: Channel },

    #[error("transport error: {0}")]
    Transport(String),
}

/// Push/SMS transport.
///
/// One call per recipient; implementations own any retry policy.
pub trait Notifier: Send + Sync {
    fn send(
        &self,
        recipient: UserId,
        channel: Channel,
        envelope: &Envelope,
    ) -> impl Future<Output = Result<(), NotifyError>> + Send;
}

impl<N: Notifier> Notifier for Arc<N> {
    fn send(
        &self,
        recipient: UserId,
        channel: Channel,
        envelope: &Envelope,
    ) -> impl Future<Output = Result<(), NotifyError>> + Send {
        (**self).send(recipient, channel, envelope)
    }
}

/// Notifier that records each delivery in the log and always succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn send(
        &self,
        recipient: UserId,
        channel: Channel,
        envelope: &Envelope,
    ) -> Result<(), NotifyError> {
        tracing::info!(
            job_id = %envelope.job_id,
            recipient = %recipient,
            %channel,
            kind = ?envelope.kind,
            summary = %envelope.summary,
            "Notification sent"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryFailure {
    pub recipient: UserId,
    pub reason: String,
}

/// Per-recipient outcome of one send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Delivered(UserId),
    Failed(DeliveryFailure),
    /// Not attempted because the offer was superseded first.
    Skipped(UserId),
}

/// Aggregate outcome of a notification step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub delivered: Vec<UserId>,
    pub failed: Vec<DeliveryFailure>,
    pub skipped: Vec<UserId>,
}

impl DeliveryReport {
    pub fn collect(outcomes: impl IntoIterator<Item = Delivery>) -> Self {
        let mut report = Self::default();
        for outcome in outcomes {
            match outcome {
                Delivery::Delivered(id) => report.delivered.push(id),
                Delivery::Failed(failure) => report.failed.push(failure),
                Delivery::Skipped(id) => report.skipped.push(id),
            }
        }
        report
    }

    pub fn merge(mut self, other: DeliveryReport) -> Self {
        self.delivered.extend(other.delivered);
        self.failed.extend(other.failed);
        self.skipped.extend(other.skipped);
        self
    }

    /// At least one message went out and none failed.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !self.delivered.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.delivered.is_empty() && self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// A state change that went through, plus what happened to the messages
/// announcing it. Delivery problems never turn `value` into an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispatched<T> {
    pub value: T,
    pub notify: DeliveryReport,
}

impl<T> Dispatched<T> {
    pub fn new(value: T, notify: DeliveryReport) -> Self {
        Self { value, notify }
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}
