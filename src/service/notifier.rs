//! Leaderboard change fan-out.
//!
//! Each subscriber owns a bounded channel. Delivery is best-effort and
//! at-least-once per connected subscriber; a subscriber whose queue fills is
//! disconnected with a recorded reason instead of being allowed to stall the
//! publisher or the write path.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crossbeam::channel::{Receiver, Sender, TryRecvError, TrySendError};
use thiserror::Error;

use crate::core::snapshot::{changed_principals, rank_order_changed};
use crate::core::{LeaderboardSnapshot, LeaderboardUpdate, Limits};
use crate::service::clock::TimeSource;
use crate::service::metrics;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NotifierLimits {
    pub max_subscribers: usize,
    pub queue_max_updates: usize,
}

impl NotifierLimits {
    pub fn from_limits(limits: &Limits) -> Self {
        Self {
            max_subscribers: limits.max_subscribers,
            queue_max_updates: limits.subscriber_queue_max_updates,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    SubscriberLagged,
}

/// Receiving half of one subscription: an infinite, lazily consumed stream
/// of updates with a per-connection monotonic sequence.
#[derive(Debug)]
pub struct UpdateSubscription {
    receiver: Receiver<LeaderboardUpdate>,
    drop_reason: Arc<Mutex<Option<DropReason>>>,
}

impl UpdateSubscription {
    pub fn recv(&self) -> Result<LeaderboardUpdate, crossbeam::channel::RecvError> {
        self.receiver.recv()
    }

    pub fn try_recv(&self) -> Result<LeaderboardUpdate, TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn iter(&self) -> impl Iterator<Item = LeaderboardUpdate> + '_ {
        self.receiver.iter()
    }

    /// Set once the publisher disconnects this subscriber.
    pub fn drop_reason(&self) -> Option<DropReason> {
        self.drop_reason.lock().ok().and_then(|guard| *guard)
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("subscriber limit reached ({max_subscribers})")]
    SubscriberLimitReached { max_subscribers: usize },
    #[error("notifier lock poisoned")]
    LockPoisoned,
}

/// What a publish call did, for metrics and tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublishReport {
    /// False when the diff was a no-op and nothing was emitted.
    pub published: bool,
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Clone)]
pub struct ChangeNotifier {
    clock: Arc<dyn TimeSource>,
    inner: Arc<Mutex<NotifierState>>,
}

impl ChangeNotifier {
    pub fn new(limits: NotifierLimits, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            clock,
            inner: Arc::new(Mutex::new(NotifierState {
                limits,
                next_subscriber_id: 1,
                subscribers: BTreeMap::new(),
            })),
        }
    }

    pub fn subscribe(&self) -> Result<UpdateSubscription, NotifyError> {
        let mut state = self.lock_state()?;
        if state.subscribers.len() >= state.limits.max_subscribers {
            return Err(NotifyError::SubscriberLimitReached {
                max_subscribers: state.limits.max_subscribers,
            });
        }

        let (sender, receiver) = crossbeam::channel::bounded(state.limits.queue_max_updates);
        let drop_reason = Arc::new(Mutex::new(None));
        let id = state.next_subscriber_id;
        state.next_subscriber_id = state.next_subscriber_id.saturating_add(1);
        state.subscribers.insert(
            id,
            SubscriberState {
                sender,
                next_sequence: 1,
                drop_reason: Arc::clone(&drop_reason),
            },
        );

        Ok(UpdateSubscription {
            receiver,
            drop_reason,
        })
    }

    /// Emit the new snapshot to every live subscriber, unless it matches the
    /// old one in membership and rank order (no-op diffs are suppressed).
    pub fn publish(
        &self,
        old: &LeaderboardSnapshot,
        new: &LeaderboardSnapshot,
    ) -> Result<PublishReport, NotifyError> {
        if !rank_order_changed(old, new) {
            metrics::broadcast_suppressed();
            return Ok(PublishReport {
                published: false,
                delivered: 0,
                dropped: 0,
            });
        }
        let changed = changed_principals(old, new);
        let timestamp_ms = self.clock.now_ms();

        let mut state = self.lock_state()?;
        let mut delivered = 0;
        let mut dropped = Vec::new();
        for (id, subscriber) in &mut state.subscribers {
            let update = LeaderboardUpdate {
                timestamp_ms,
                entries: new.entries().to_vec(),
                changed_principals: changed.clone(),
                sequence: subscriber.next_sequence,
            };
            match subscriber.sender.try_send(update) {
                Ok(()) => {
                    subscriber.next_sequence += 1;
                    delivered += 1;
                }
                Err(TrySendError::Full(_)) => {
                    subscriber.set_drop_reason(DropReason::SubscriberLagged);
                    dropped.push(*id);
                }
                Err(TrySendError::Disconnected(_)) => {
                    dropped.push(*id);
                }
            }
        }
        let dropped_count = dropped.len();
        for id in dropped {
            state.subscribers.remove(&id);
        }

        metrics::broadcast_published(delivered, dropped_count);
        Ok(PublishReport {
            published: true,
            delivered,
            dropped: dropped_count,
        })
    }

    pub fn subscriber_count(&self) -> Result<usize, NotifyError> {
        Ok(self.lock_state()?.subscribers.len())
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, NotifierState>, NotifyError> {
        self.inner.lock().map_err(|_| NotifyError::LockPoisoned)
    }
}

struct NotifierState {
    limits: NotifierLimits,
    next_subscriber_id: u64,
    subscribers: BTreeMap<u64, SubscriberState>,
}

struct SubscriberState {
    sender: Sender<LeaderboardUpdate>,
    next_sequence: u64,
    drop_reason: Arc<Mutex<Option<DropReason>>>,
}

impl SubscriberState {
    fn set_drop_reason(&self, reason: DropReason) {
        if let Ok(mut guard) = self.drop_reason.lock()
            && guard.is_none()
        {
            *guard = Some(reason);
        }
    }
}
