use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use crate::state_machine::{JobId, UserId};

/// Offer state for one job.
#[derive(Debug, Clone)]
enum Offer {
    /// Broadcast at `epoch` and still open to `recipients`.
    Live {
        epoch: u64,
        recipients: BTreeSet<UserId>,
    },
    /// The job was taken in `epoch`. Only the epoch is kept, so a broadcast
    /// for that epoch arriving late cannot reopen it.
    Closed { epoch: u64 },
}

impl Offer {
    fn epoch(&self) -> u64 {
        match self {
            Offer::Live { epoch, .. } | Offer::Closed { epoch } => *epoch,
        }
    }
}

/// Pending broadcast offers, one entry per job.
///
/// An offer belongs to the acceptance epoch it was broadcast in. Once the job
/// is taken the offer is closed: sends still queued for it are skipped and it
/// no longer counts as "offered" to anyone. A closed entry shrinks to its
/// epoch.
#[derive(Debug, Default)]
pub struct OfferBook {
    offers: Mutex<HashMap<JobId, Offer>>,
}

impl OfferBook {
    pub fn new() -> Self {
        Self::default()
    }

    // The map holds no cross-entry invariants, so a poisoned guard is still usable.
    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, Offer>> {
        self.offers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a broadcast of `job_id` at `epoch`.
    ///
    /// Re-broadcasting a live offer widens its recipient set and a newer
    /// epoch replaces whatever was there. An epoch that is older than the
    /// stored one, or that was already closed, is ignored.
    pub fn open(&self, job_id: JobId, epoch: u64, recipients: &[UserId]) {
        let mut offers = self.lock();
        let widen = match offers.get(&job_id) {
            Some(Offer::Live { epoch: current, .. }) if *current == epoch => true,
            Some(offer) if offer.epoch() >= epoch => return,
            _ => false,
        };
        if !widen {
            offers.insert(
                job_id,
                Offer::Live {
                    epoch,
                    recipients: recipients.iter().copied().collect(),
                },
            );
        } else if let Some(Offer::Live {
            recipients: existing,
            ..
        }) = offers.get_mut(&job_id)
        {
            existing.extend(recipients.iter().copied());
        }
    }

    /// Whether a broadcast at `epoch` may still deliver.
    pub fn is_live(&self, job_id: JobId, epoch: u64) -> bool {
        matches!(
            self.lock().get(&job_id),
            Some(Offer::Live { epoch: e, .. }) if *e == epoch
        )
    }

    /// Close `epoch` for `job_id` and return the recipients of its live offer.
    ///
    /// Closing an epoch that was never broadcast still records it as closed,
    /// so a broadcast that lost the race with the acceptance stays silent.
    /// Returns nothing if the epoch was already closed or is older than the
    /// stored one.
    pub fn supersede(&self, job_id: JobId, epoch: u64) -> Vec<UserId> {
        let mut offers = self.lock();
        match offers.get(&job_id) {
            Some(offer) if offer.epoch() > epoch => return Vec::new(),
            Some(Offer::Closed { epoch: e }) if *e == epoch => return Vec::new(),
            _ => {}
        }
        match offers.insert(job_id, Offer::Closed { epoch }) {
            Some(Offer::Live {
                epoch: e,
                recipients,
            }) if e == epoch => recipients.into_iter().collect(),
            _ => Vec::new(),
        }
    }

    pub fn is_offered(&self, job_id: JobId, epoch: u64, worker: UserId) -> bool {
        matches!(
            self.lock().get(&job_id),
            Some(Offer::Live { epoch: e, recipients }) if *e == epoch && recipients.contains(&worker)
        )
    }

    /// Jobs with a live offer naming `worker`, paired with the offer epoch.
    pub fn offered_to(&self, worker: UserId) -> Vec<(JobId, u64)> {
        self.lock()
            .iter()
            .filter_map(|(id, offer)| match offer {
                Offer::Live { epoch, recipients } if recipients.contains(&worker) => {
                    Some((*id, *epoch))
                }
                _ => None,
            })
            .collect()
    }

    /// Number of jobs still holding a recipient list.
    pub fn live_count(&self) -> usize {
        self.lock()
            .values()
            .filter(|o| matches!(o, Offer::Live { .. }))
            .count()
    }
}
