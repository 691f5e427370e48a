use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures_util::stream::{self, StreamExt};

use super::{
    Channel, Delivery, DeliveryFailure, DeliveryReport, Envelope, NotificationKind, Notifier,
    OfferBook, Recipients, WorkerProfile, WorkerRoster,
};
use crate::config::NotificationConfig;
use crate::state_machine::{Job, UserId};

/// Turns state changes into notifications.
///
/// Owns the roster (who is eligible) and the offer book (what is still on
/// offer). Sends to different recipients run concurrently, at most
/// `max_in_flight` at a time, and the report lists recipients in send order.
pub struct FanOut<N> {
    notifier: N,
    roster: RwLock<WorkerRoster>,
    offers: OfferBook,
    channels: NotificationConfig,
}

impl<N: Notifier> FanOut<N> {
    pub fn new(notifier: N, roster: WorkerRoster, channels: NotificationConfig) -> Self {
        Self {
            notifier,
            roster: RwLock::new(roster),
            offers: OfferBook::new(),
            channels,
        }
    }

    pub fn channels(&self) -> &NotificationConfig {
        &self.channels
    }

    pub fn offers(&self) -> &OfferBook {
        &self.offers
    }

    fn roster(&self) -> RwLockReadGuard<'_, WorkerRoster> {
        self.roster.read().unwrap_or_else(|p| p.into_inner())
    }

    fn roster_mut(&self) -> RwLockWriteGuard<'_, WorkerRoster> {
        self.roster.write().unwrap_or_else(|p| p.into_inner())
    }

    pub fn register_worker(&self, profile: WorkerProfile) {
        self.roster_mut().register(profile);
    }

    pub fn deregister_worker(&self, id: UserId) -> bool {
        self.roster_mut().deregister(id)
    }

    pub fn eligible_for(&self, job: &Job) -> Vec<UserId> {
        self.roster().eligible_for(job)
    }

    /// Offer an open job to every eligible worker.
    ///
    /// The offer is tied to the job's current epoch. If the job is taken while
    /// the broadcast is still going out, the remaining sends are skipped; if
    /// it was taken before the offer was even recorded, every send is.
    pub async fn broadcast(&self, job: &Job, channel: Channel) -> DeliveryReport {
        let recipients = self.eligible_for(job);
        let (job_id, epoch) = (job.id, job.epoch);
        self.offers.open(job_id, epoch, &recipients);
        tracing::debug!(job_id = %job_id, epoch, recipients = recipients.len(), "Broadcasting offer");

        let envelope = Envelope::new(
            job,
            Recipients::Eligible(recipients.clone()),
            channel,
            NotificationKind::NewJob,
        );
        self.deliver(&envelope, &recipients, |_| self.offers.is_live(job_id, epoch))
            .await
    }

    /// Send one message to one worker.
    pub async fn direct(
        &self,
        job: &Job,
        worker: UserId,
        kind: NotificationKind,
        channel: Channel,
    ) -> DeliveryReport {
        let envelope = Envelope::new(job, Recipients::Worker(worker), channel, kind);
        self.deliver(&envelope, &[worker], |_| true).await
    }

    /// Close the offer made at `offer_epoch` and tell every other recipient
    /// that `winner` took the job. Already-delivered offers are not revoked.
    /// A second call for the same epoch sends nothing.
    pub async fn supersede(&self, job: &Job, offer_epoch: u64, winner: UserId) -> DeliveryReport {
        let losers: Vec<UserId> = self
            .offers
            .supersede(job.id, offer_epoch)
            .into_iter()
            .filter(|id| *id != winner)
            .collect();
        if losers.is_empty() {
            return DeliveryReport::default();
        }

        let envelope = Envelope::new(
            job,
            Recipients::Eligible(losers.clone()),
            self.channels.broadcast_channel,
            NotificationKind::JobTaken,
        );
        self.deliver(&envelope, &losers, |_| true).await
    }

    async fn deliver<F>(
        &self,
        envelope: &Envelope,
        recipients: &[UserId],
        still_wanted: F,
    ) -> DeliveryReport
    where
        F: Fn(UserId) -> bool + Send + Sync,
    {
        let still_wanted = &still_wanted;
        let limit = self.channels.max_in_flight.max(1);
        let sends = stream::iter(recipients.iter().copied()).map(|recipient| async move {
            if !still_wanted(recipient) {
                return Delivery::Skipped(recipient);
            }
            match self.notifier.send(recipient, envelope.channel, envelope).await {
                Ok(()) => Delivery::Delivered(recipient),
                Err(err) => {
                    tracing::warn!(
                        job_id = %envelope.job_id,
                        recipient = %recipient,
                        channel = %envelope.channel,
                        error = %err,
                        "Notification failed"
                    );
                    Delivery::Failed(DeliveryFailure {
                        recipient,
                        reason: err.to_string(),
                    })
                }
            }
        });
        let outcomes: Vec<Delivery> = sends.buffered(limit).collect().await;
        DeliveryReport::collect(outcomes)
    }
}
