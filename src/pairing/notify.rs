//! Per-entry match notification channels
//!
//! Each Waiting entry owns a single-consumer channel. The claiming side
//! publishes exactly one matched signal into it; the waiting side holds the
//! receiving half and races it against its timeout. Publishing removes the
//! sending half first, so a channel can never deliver twice.

use crate::error::{PairingError, Result};
use crate::types::{EntryId, UserId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::oneshot;
use tracing::debug;

/// Payload delivered to a waiting subscriber when its entry is claimed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSignal {
    pub partner: UserId,
}

/// Receiving half of a per-entry channel, held by exactly one pending session
#[derive(Debug)]
pub struct MatchSubscription {
    pub entry_id: EntryId,
    pub(crate) receiver: oneshot::Receiver<MatchSignal>,
}

impl MatchSubscription {
    /// Wait for the matched signal. An error means the channel was torn
    /// down without delivery (cancellation, timeout, or notifier loss).
    pub async fn wait(self) -> Result<MatchSignal> {
        self.receiver.await.map_err(|_| {
            PairingError::SubscriptionFailed {
                reason: "Notification channel closed before delivery".to_string(),
            }
            .into()
        })
    }
}

/// Trait for the per-entry publish/subscribe transport
///
/// Subscription must be established before the entry becomes visible to
/// claimants, otherwise a match could be published into a channel nobody
/// holds yet.
#[async_trait]
pub trait MatchNotifier: Send + Sync {
    /// Open the channel for `entry_id` and hand back its receiving half
    async fn subscribe(&self, entry_id: EntryId) -> Result<MatchSubscription>;

    /// Deliver the matched signal to the entry's subscriber.
    /// Returns false when no subscriber is attached (already resolved).
    async fn publish_match(&self, entry_id: EntryId, partner: UserId) -> Result<bool>;

    /// Tear down the channel without delivering anything
    async fn unsubscribe(&self, entry_id: EntryId) -> Result<()>;

    /// Number of channels currently awaiting delivery
    async fn active_subscriptions(&self) -> usize;
}

/// In-process notifier backed by one oneshot channel per entry
#[derive(Debug, Default)]
pub struct InProcessNotifier {
    channels: RwLock<HashMap<EntryId, oneshot::Sender<MatchSignal>>>,
}

impl InProcessNotifier {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MatchNotifier for InProcessNotifier {
    async fn subscribe(&self, entry_id: EntryId) -> Result<MatchSubscription> {
        let mut channels = self
            .channels
            .write()
            .map_err(|_| PairingError::InternalError {
                message: "Failed to acquire notifier write lock".to_string(),
            })?;

        if channels.contains_key(&entry_id) {
            return Err(PairingError::ChannelConflict {
                entry_id: entry_id.to_string(),
            }
            .into());
        }

        let (sender, receiver) = oneshot::channel();
        channels.insert(entry_id, sender);
        debug!("Opened notification channel for entry {}", entry_id);

        Ok(MatchSubscription { entry_id, receiver })
    }

    async fn publish_match(&self, entry_id: EntryId, partner: UserId) -> Result<bool> {
        // Removing the sender before sending makes a second publish
        // impossible: whoever takes the sender is the only deliverer.
        let sender = {
            let mut channels = self
                .channels
                .write()
                .map_err(|_| PairingError::InternalError {
                    message: "Failed to acquire notifier write lock".to_string(),
                })?;
            channels.remove(&entry_id)
        };

        match sender {
            Some(sender) => match sender.send(MatchSignal { partner }) {
                Ok(()) => {
                    debug!("Delivered match signal for entry {}", entry_id);
                    Ok(true)
                }
                Err(_) => {
                    // Receiver already dropped: the session resolved first
                    debug!(
                        "Subscriber for entry {} left before delivery",
                        entry_id
                    );
                    Ok(false)
                }
            },
            None => Ok(false),
        }
    }

    async fn unsubscribe(&self, entry_id: EntryId) -> Result<()> {
        let mut channels = self
            .channels
            .write()
            .map_err(|_| PairingError::InternalError {
                message: "Failed to acquire notifier write lock".to_string(),
            })?;

        if channels.remove(&entry_id).is_some() {
            debug!("Closed notification channel for entry {}", entry_id);
        }
        Ok(())
    }

    async fn active_subscriptions(&self) -> usize {
        self.channels
            .read()
            .map(|channels| channels.len())
            .unwrap_or(0)
    }
}

/// Mock notifier for testing
///
/// Delegates to an in-process notifier and can be told to fail
/// subscriptions, exercising the fatal-subscription error path.
#[derive(Debug, Default)]
pub struct MockMatchNotifier {
    inner: InProcessNotifier,
    fail_subscriptions: RwLock<bool>,
}

impl MockMatchNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_subscriptions(&self, fail: bool) {
        if let Ok(mut flag) = self.fail_subscriptions.write() {
            *flag = fail;
        }
    }
}

#[async_trait]
impl MatchNotifier for MockMatchNotifier {
    async fn subscribe(&self, entry_id: EntryId) -> Result<MatchSubscription> {
        let fail = self
            .fail_subscriptions
            .read()
            .map(|flag| *flag)
            .unwrap_or(false);
        if fail {
            return Err(PairingError::SubscriptionFailed {
                reason: "Injected subscription failure".to_string(),
            }
            .into());
        }
        self.inner.subscribe(entry_id).await
    }

    async fn publish_match(&self, entry_id: EntryId, partner: UserId) -> Result<bool> {
        self.inner.publish_match(entry_id, partner).await
    }

    async fn unsubscribe(&self, entry_id: EntryId) -> Result<()> {
        self.inner.unsubscribe(entry_id).await
    }

    async fn active_subscriptions(&self) -> usize {
        self.inner.active_subscriptions().await
    }
}
