use std::collections::HashSet;
use std::sync::Mutex;

use super::{Channel, Envelope, NotificationKind, Notifier, NotifyError};
use crate::state_machine::{JobId, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Sent {
    pub job_id: JobId,
    pub recipient: UserId,
    pub channel: Channel,
    pub kind: NotificationKind,
}

/// Records every send; fails for the configured recipients.
#[derive(Debug, Default)]
pub(crate) struct RecordingNotifier {
    sent: Mutex<Vec<Sent>>,
    failing: HashSet<UserId>,
    fail_all: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(ids: &[UserId]) -> Self {
        Self {
            failing: ids.iter().copied().collect(),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn kinds_for(&self, recipient: UserId) -> Vec<NotificationKind> {
        self.sent()
            .into_iter()
            .filter(|s| s.recipient == recipient)
            .map(|s| s.kind)
            .collect()
    }

    pub fn count(&self, kind: NotificationKind) -> usize {
        self.sent().iter().filter(|s| s.kind == kind).count()
    }
}

impl Notifier for RecordingNotifier {
    async fn send(
        &self,
        recipient: UserId,
        channel: Channel,
        envelope: &Envelope,
    ) -> Result<(), NotifyError> {
        if self.fail_all || self.failing.contains(&recipient) {
            return Err(NotifyError::Transport("gateway unavailable".into()));
        }
        self.sent.lock().unwrap().push(Sent {
            job_id: envelope.job_id,
            recipient,
            channel,
            kind: envelope.kind,
        });
        Ok(())
    }
}

/// Holds the send to one recipient until [`GatedNotifier::release`] is
/// called; every send is then recorded by `inner`.
#[derive(Debug)]
pub(crate) struct GatedNotifier {
    pub inner: RecordingNotifier,
    gated: UserId,
    entered: tokio::sync::Notify,
    release: tokio::sync::Notify,
}

impl GatedNotifier {
    pub fn new(gated: UserId) -> Self {
        Self {
            inner: RecordingNotifier::new(),
            gated,
            entered: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        }
    }

    /// Resolves once the gated send has started.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

impl Notifier for GatedNotifier {
    async fn send(
        &self,
        recipient: UserId,
        channel: Channel,
        envelope: &Envelope,
    ) -> Result<(), NotifyError> {
        if recipient == self.gated {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.send(recipient, channel, envelope).await
    }
}
