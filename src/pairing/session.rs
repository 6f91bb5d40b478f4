//! Pending session state and the timeout supervisor
//!
//! A pending session is a waiter that inserted a Waiting entry and now
//! races three wakeups: the match signal on its notification channel, a
//! cancellation that won its conditional delete, and the wait timer. The
//! conditional store operations decide every race, so each session resolves
//! to exactly one terminal outcome.

use crate::amqp::publisher::EventPublisher;
use crate::error::{PairingError, Result};
use crate::metrics::MetricsCollector;
use crate::pairing::engine::PairingStats;
use crate::pairing::notify::{MatchNotifier, MatchSignal, MatchSubscription};
use crate::pairing::store::QueueStore;
use crate::types::{EntryId, EntryStatus, MatchOutcome, SessionCancelled, SessionTimedOut, UserId};
use crate::utils::current_timestamp;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Notify;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Shared registry of live pending sessions, keyed by user
pub type SessionRegistry = Arc<RwLock<HashMap<UserId, SessionCanceller>>>;

/// Cancellation handle for a pending session, usable from any task.
///
/// Cancellation is advisory: it wins only while the entry is still
/// Waiting. The conditional delete is the decider; the session side is
/// woken afterwards, so its read of the store is never ambiguous.
#[derive(Clone)]
pub struct SessionCanceller {
    entry_id: EntryId,
    user_id: UserId,
    store: Arc<dyn QueueStore>,
    cancel_signal: Arc<Notify>,
}

impl SessionCanceller {
    pub fn entry_id(&self) -> EntryId {
        self.entry_id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Attempt to cancel the session. Returns true when cancellation won
    /// the race, false when a match or timeout got there first.
    pub async fn cancel(&self) -> Result<bool> {
        let won = self
            .store
            .delete_if_status(self.entry_id, EntryStatus::Waiting)
            .await?;

        if won {
            info!(
                "Cancellation won for user {} (entry {})",
                self.user_id, self.entry_id
            );
            self.cancel_signal.notify_one();
        } else {
            debug!(
                "Cancellation for user {} lost the race (entry {})",
                self.user_id, self.entry_id
            );
        }

        Ok(won)
    }
}

/// Reclaims an expired waiter, or surfaces the match that beat the timer.
///
/// Timeout and match are two races targeting the same conditional delete;
/// whichever conditional operation wins determines the terminal outcome.
pub struct TimeoutSupervisor {
    store: Arc<dyn QueueStore>,
    notifier: Arc<dyn MatchNotifier>,
}

impl TimeoutSupervisor {
    pub fn new(store: Arc<dyn QueueStore>, notifier: Arc<dyn MatchNotifier>) -> Self {
        Self { store, notifier }
    }

    /// Resolve an expired pending session
    pub async fn resolve_expiry(&self, entry_id: EntryId, user_id: &UserId) -> Result<MatchOutcome> {
        if let Err(e) = self.notifier.unsubscribe(entry_id).await {
            warn!(
                "Failed to tear down channel for expired entry {}: {}",
                entry_id, e
            );
        }

        if self
            .store
            .delete_if_status(entry_id, EntryStatus::Waiting)
            .await?
        {
            info!("Wait expired for user {} (entry {})", user_id, entry_id);
            return Ok(MatchOutcome::TimedOut);
        }

        // The entry left Waiting in the narrow window before the timer
        // fired. Read it back to learn which terminal state won.
        match self.store.get(entry_id).await? {
            Some(entry) if entry.status == EntryStatus::Matched => match entry.matched_with {
                Some(partner) => {
                    debug!(
                        "Timeout for user {} lost to a match with {}",
                        user_id, partner
                    );
                    Ok(MatchOutcome::Matched { partner })
                }
                None => Err(PairingError::InternalError {
                    message: format!("Matched entry {} has no partner recorded", entry_id),
                }
                .into()),
            },
            // Deleted out from under us: a newer enqueue by the same user
            // reclaimed the entry, which supersedes this session.
            _ => Ok(MatchOutcome::Cancelled),
        }
    }
}

enum Wakeup {
    Signal(std::result::Result<MatchSignal, tokio::sync::oneshot::error::RecvError>),
    CancelWon,
    Expired,
}

/// A waiter's half of a pairing that has not resolved yet.
///
/// Obtained from the engine's enqueue when no candidate could be claimed.
/// `outcome` must be awaited exactly once; it consumes the session and is
/// the only place the terminal outcome is produced.
pub struct PendingSession {
    entry_id: EntryId,
    user_id: UserId,
    subscription: MatchSubscription,
    cancel_signal: Arc<Notify>,
    wait_timeout: Duration,
    started: Instant,
    store: Arc<dyn QueueStore>,
    notifier: Arc<dyn MatchNotifier>,
    publisher: Arc<dyn EventPublisher>,
    metrics: Arc<MetricsCollector>,
    stats: Arc<RwLock<PairingStats>>,
    sessions: SessionRegistry,
}

impl PendingSession {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        user_id: UserId,
        subscription: MatchSubscription,
        wait_timeout: Duration,
        store: Arc<dyn QueueStore>,
        notifier: Arc<dyn MatchNotifier>,
        publisher: Arc<dyn EventPublisher>,
        metrics: Arc<MetricsCollector>,
        stats: Arc<RwLock<PairingStats>>,
        sessions: SessionRegistry,
    ) -> Self {
        Self {
            entry_id: subscription.entry_id,
            user_id,
            subscription,
            cancel_signal: Arc::new(Notify::new()),
            wait_timeout,
            started: Instant::now(),
            store,
            notifier,
            publisher,
            metrics,
            stats,
            sessions,
        }
    }

    pub fn entry_id(&self) -> EntryId {
        self.entry_id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Cancellation handle for this session
    pub fn canceller(&self) -> SessionCanceller {
        SessionCanceller {
            entry_id: self.entry_id,
            user_id: self.user_id.clone(),
            store: Arc::clone(&self.store),
            cancel_signal: Arc::clone(&self.cancel_signal),
        }
    }

    /// Await the session's terminal outcome
    pub async fn outcome(mut self) -> Result<MatchOutcome> {
        let wakeup = tokio::select! {
            signal = &mut self.subscription.receiver => Wakeup::Signal(signal),
            _ = self.cancel_signal.notified() => Wakeup::CancelWon,
            _ = tokio::time::sleep(self.wait_timeout) => Wakeup::Expired,
        };

        let resolution = match wakeup {
            Wakeup::Signal(Ok(signal)) => Ok(MatchOutcome::Matched {
                partner: signal.partner,
            }),
            Wakeup::Signal(Err(_)) => self.resolve_channel_loss().await,
            Wakeup::CancelWon => {
                // The canceller already won its conditional delete; tear
                // down the channel so no late signal lingers.
                if let Err(e) = self.notifier.unsubscribe(self.entry_id).await {
                    warn!(
                        "Failed to tear down channel for cancelled entry {}: {}",
                        self.entry_id, e
                    );
                }
                Ok(MatchOutcome::Cancelled)
            }
            Wakeup::Expired => {
                let supervisor =
                    TimeoutSupervisor::new(Arc::clone(&self.store), Arc::clone(&self.notifier));
                supervisor.resolve_expiry(self.entry_id, &self.user_id).await
            }
        };

        self.finish(&resolution).await;
        resolution
    }

    /// The channel closed without delivery and without a local cancel: the
    /// notification infrastructure failed. Reclaim the entry and fail the
    /// session, or surface the match a claimant recorded in the meantime.
    async fn resolve_channel_loss(&self) -> Result<MatchOutcome> {
        warn!(
            "Notification channel for entry {} closed while waiting",
            self.entry_id
        );

        if self
            .store
            .delete_if_status(self.entry_id, EntryStatus::Waiting)
            .await?
        {
            return Err(PairingError::SubscriptionFailed {
                reason: format!(
                    "Channel for entry {} was lost before any match arrived",
                    self.entry_id
                ),
            }
            .into());
        }

        match self.store.get(self.entry_id).await? {
            Some(entry) if entry.status == EntryStatus::Matched => match entry.matched_with {
                Some(partner) => Ok(MatchOutcome::Matched { partner }),
                None => Err(PairingError::InternalError {
                    message: format!("Matched entry {} has no partner recorded", self.entry_id),
                }
                .into()),
            },
            _ => Ok(MatchOutcome::Cancelled),
        }
    }

    async fn finish(&self, resolution: &Result<MatchOutcome>) {
        self.deregister();
        self.metrics.dec_pending_sessions();

        let waited = self.started.elapsed();
        self.metrics.observe_wait_duration(waited.as_secs_f64());

        match resolution {
            Ok(MatchOutcome::Matched { partner }) => {
                // The claiming side already announced the pairing
                if let Ok(mut stats) = self.stats.write() {
                    stats.deferred_matches += 1;
                }
                self.metrics.record_deferred_match();
                info!(
                    "Session for user {} resolved: matched with {}",
                    self.user_id, partner
                );
            }
            Ok(MatchOutcome::TimedOut) => {
                if let Ok(mut stats) = self.stats.write() {
                    stats.timeouts += 1;
                }
                self.metrics.record_timeout();
                let event = SessionTimedOut {
                    entry_id: self.entry_id,
                    user_id: self.user_id.clone(),
                    waited_secs: waited.as_secs(),
                    timestamp: current_timestamp(),
                };
                if let Err(e) = self.publisher.publish_session_timed_out(event).await {
                    warn!(
                        "Failed to publish timeout event for user {}: {}",
                        self.user_id, e
                    );
                }
                info!(
                    "Session for user {} resolved: timed out after {:?}",
                    self.user_id, waited
                );
            }
            Ok(MatchOutcome::Cancelled) => {
                if let Ok(mut stats) = self.stats.write() {
                    stats.cancellations += 1;
                }
                self.metrics.record_cancellation();
                let event = SessionCancelled {
                    entry_id: self.entry_id,
                    user_id: self.user_id.clone(),
                    timestamp: current_timestamp(),
                };
                if let Err(e) = self.publisher.publish_session_cancelled(event).await {
                    warn!(
                        "Failed to publish cancel event for user {}: {}",
                        self.user_id, e
                    );
                }
                info!("Session for user {} resolved: cancelled", self.user_id);
            }
            Err(e) => {
                if let Ok(mut stats) = self.stats.write() {
                    stats.subscription_failures += 1;
                }
                error!("Session for user {} failed: {}", self.user_id, e);
            }
        }
    }

    fn deregister(&self) {
        if let Ok(mut sessions) = self.sessions.write() {
            let owns_slot = sessions
                .get(&self.user_id)
                .map(|canceller| canceller.entry_id == self.entry_id)
                .unwrap_or(false);
            if owns_slot {
                sessions.remove(&self.user_id);
            }
        }
    }
}
