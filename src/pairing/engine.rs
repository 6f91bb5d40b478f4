//! Pairing engine implementation for claim-or-wait matchmaking
//!
//! This module provides the core PairingEngine that reclaims stale entries,
//! tries to claim the oldest compatible waiter, and falls back to
//! registering the caller as a new waiter when no claim lands.

use crate::amqp::publisher::EventPublisher;
use crate::config::PairingConfig;
use crate::error::{PairingError, Result};
use crate::metrics::MetricsCollector;
use crate::pairing::notify::MatchNotifier;
use crate::pairing::session::{PendingSession, SessionRegistry};
use crate::pairing::store::QueueStore;
use crate::types::{CallDescriptor, EntryStatus, MatchFound, QueueEntry, UserEnqueued, UserId};
use crate::utils::current_timestamp;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::time::{interval, Instant};
use tracing::{debug, error, info, warn};

/// Statistics about pairing engine operations
#[derive(Debug, Clone, Default)]
pub struct PairingStats {
    /// Total number of pair requests accepted
    pub enqueues: u64,
    /// Matches completed synchronously by the claiming side
    pub immediate_matches: u64,
    /// Matches delivered to a waiter over its notification channel
    pub deferred_matches: u64,
    /// Sessions that expired without finding a partner
    pub timeouts: u64,
    /// Sessions cancelled before a match arrived
    pub cancellations: u64,
    /// Conditional claims that lost their race
    pub claim_conflicts: u64,
    /// Stale entries reclaimed on enqueue or by the sweeper
    pub stale_reclaims: u64,
    /// Pending sessions that failed with a dead channel
    pub subscription_failures: u64,
}

/// Result of an enqueue: either paired on the spot or left waiting
pub enum EnqueueOutcome {
    /// An existing waiter was claimed; the pairing is recorded and announced
    Matched { partner: UserId },
    /// No claimable waiter; the caller holds the pending session
    Pending(PendingSession),
}

/// The main pairing engine
#[derive(Clone)]
pub struct PairingEngine {
    /// Shared table of queue entries
    store: Arc<dyn QueueStore>,
    /// Per-entry notification channels
    notifier: Arc<dyn MatchNotifier>,
    /// Event publisher for pairing lifecycle events
    event_publisher: Arc<dyn EventPublisher>,
    /// Pairing configuration
    config: PairingConfig,
    /// Live pending sessions keyed by user, for remote cancellation
    sessions: SessionRegistry,
    /// Engine statistics
    stats: Arc<RwLock<PairingStats>>,
    /// Metrics collector for recording performance data
    metrics_collector: Arc<MetricsCollector>,
}

impl PairingEngine {
    /// Create a new pairing engine
    pub fn new(
        store: Arc<dyn QueueStore>,
        notifier: Arc<dyn MatchNotifier>,
        event_publisher: Arc<dyn EventPublisher>,
        config: PairingConfig,
    ) -> Self {
        // Create a default metrics collector if none provided
        let metrics_collector = Arc::new(MetricsCollector::new().unwrap_or_else(|_| {
            warn!("Failed to create metrics collector, using default");
            MetricsCollector::default()
        }));

        Self::with_metrics(store, notifier, event_publisher, config, metrics_collector)
    }

    /// Create a new pairing engine with an explicit metrics collector
    pub fn with_metrics(
        store: Arc<dyn QueueStore>,
        notifier: Arc<dyn MatchNotifier>,
        event_publisher: Arc<dyn EventPublisher>,
        config: PairingConfig,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            store,
            notifier,
            event_publisher,
            config,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(PairingStats::default())),
            metrics_collector,
        }
    }

    /// Handle a pair request from a user
    ///
    /// Claims the oldest compatible waiter when one exists; otherwise the
    /// user becomes a waiter and receives a pending session to await. The
    /// conditional claim is the only arbiter between concurrent attempts,
    /// so at most one pairing results per entry.
    pub async fn enqueue(&self, user_id: UserId) -> Result<EnqueueOutcome> {
        let start_time = Instant::now();

        info!("Processing pair request for user '{}'", user_id);

        // Invalidate anything a crashed or abandoned prior session left
        // behind, so at most one non-terminal entry exists per user.
        let reclaimed = self.store.delete_all_for_user(&user_id).await?;
        if reclaimed > 0 {
            debug!(
                "Reclaimed {} stale entries for returning user '{}'",
                reclaimed, user_id
            );
            if let Ok(mut stats) = self.stats.write() {
                stats.stale_reclaims += reclaimed as u64;
            }
            self.metrics_collector
                .record_stale_reclaims(reclaimed as u64);
        }

        {
            let mut stats = self
                .stats
                .write()
                .map_err(|_| PairingError::InternalError {
                    message: "Failed to acquire stats lock".to_string(),
                })?;
            stats.enqueues += 1;
        }

        let mut claim_attempts: u32 = 0;
        loop {
            let candidate = match self.store.find_oldest_waiting(&user_id).await? {
                Some(candidate) => candidate,
                None => break,
            };

            let claimed = self
                .store
                .conditional_claim(
                    candidate.id,
                    EntryStatus::Waiting,
                    EntryStatus::Matched,
                    &user_id,
                )
                .await?;

            if claimed {
                let partner = self.complete_claim(&user_id, &candidate).await;
                let duration = start_time.elapsed();
                self.metrics_collector.record_enqueue(duration);
                info!(
                    "Pair request for '{}' completed in {:.2}ms: matched with '{}'",
                    user_id,
                    duration.as_secs_f64() * 1000.0,
                    partner
                );
                return Ok(EnqueueOutcome::Matched { partner });
            }

            // Another claimant got there first; the candidate is gone or
            // already Matched, so re-query for the next oldest waiter.
            claim_attempts += 1;
            if let Ok(mut stats) = self.stats.write() {
                stats.claim_conflicts += 1;
            }
            self.metrics_collector.record_claim_conflict();
            debug!(
                "Claim on entry {} lost its race (attempt {})",
                candidate.id, claim_attempts
            );

            if claim_attempts > self.config.max_claim_retries {
                warn!(
                    "Gave up claiming after {} lost races; user '{}' becomes a waiter",
                    claim_attempts, user_id
                );
                break;
            }
        }

        let session = self.register_waiter(user_id.clone()).await?;
        let duration = start_time.elapsed();
        self.metrics_collector.record_enqueue(duration);
        info!(
            "Pair request for '{}' completed in {:.2}ms: waiting as entry {}",
            user_id,
            duration.as_secs_f64() * 1000.0,
            session.entry_id()
        );
        Ok(EnqueueOutcome::Pending(session))
    }

    /// Record the claimant's side of a won claim and announce the pairing
    ///
    /// The claimed entry is already terminal here, so every step is
    /// best-effort: failing the caller now would strand the claimed waiter.
    async fn complete_claim(&self, user_id: &UserId, candidate: &QueueEntry) -> UserId {
        let partner = candidate.user_id.clone();

        let own_entry = QueueEntry::matched(user_id.clone(), partner.clone());
        if let Err(e) = self.store.insert(own_entry).await {
            warn!(
                "Failed to record matched entry for claimant '{}': {}",
                user_id, e
            );
        }

        match self
            .notifier
            .publish_match(candidate.id, user_id.clone())
            .await
        {
            Ok(true) => debug!(
                "Delivered match signal to entry {} (user '{}')",
                candidate.id, partner
            ),
            Ok(false) => warn!(
                "No live subscriber on entry {}; user '{}' will learn of the match from the store",
                candidate.id, partner
            ),
            Err(e) => warn!(
                "Failed to publish match signal for entry {}: {}",
                candidate.id, e
            ),
        }

        if let Ok(mut stats) = self.stats.write() {
            stats.immediate_matches += 1;
        }
        self.metrics_collector.record_immediate_match();

        let event = MatchFound {
            user_id: user_id.clone(),
            partner_id: partner.clone(),
            call: CallDescriptor::for_pair(user_id, &partner, self.config.channel_ttl_seconds),
            timestamp: current_timestamp(),
        };
        if let Err(e) = self.event_publisher.publish_match_found(event).await {
            warn!(
                "Failed to publish match event for '{}' and '{}': {}",
                user_id, partner, e
            );
        }

        partner
    }

    /// Register the user as a new waiter
    ///
    /// Subscribes before inserting, so a claim that lands the instant the
    /// entry becomes visible cannot slip past the receiver.
    async fn register_waiter(&self, user_id: UserId) -> Result<PendingSession> {
        let entry = QueueEntry::waiting(user_id.clone());
        let entry_id = entry.id;

        let subscription = self.notifier.subscribe(entry_id).await?;

        if let Err(e) = self.store.insert(entry).await {
            // No partial waiter: tear the channel down before surfacing
            if let Err(unsub_err) = self.notifier.unsubscribe(entry_id).await {
                warn!(
                    "Failed to tear down channel for entry {}: {}",
                    entry_id, unsub_err
                );
            }
            return Err(e);
        }

        let session = PendingSession::new(
            user_id.clone(),
            subscription,
            self.config.wait_timeout(),
            Arc::clone(&self.store),
            Arc::clone(&self.notifier),
            Arc::clone(&self.event_publisher),
            Arc::clone(&self.metrics_collector),
            Arc::clone(&self.stats),
            Arc::clone(&self.sessions),
        );

        match self.sessions.write() {
            Ok(mut sessions) => {
                sessions.insert(user_id.clone(), session.canceller());
            }
            Err(_) => warn!(
                "Session registry lock failed; remote cancel will not reach user '{}'",
                user_id
            ),
        }

        self.metrics_collector.inc_pending_sessions();

        let event = UserEnqueued {
            entry_id,
            user_id: user_id.clone(),
            timestamp: current_timestamp(),
        };
        if let Err(e) = self.event_publisher.publish_user_enqueued(event).await {
            warn!("Failed to publish enqueued event for '{}': {}", user_id, e);
        }

        info!("User '{}' is waiting (entry {})", user_id, entry_id);
        Ok(session)
    }

    /// Cancel a user's pending session, if one is live in this process
    ///
    /// Returns true when cancellation won the race against a match or
    /// timeout, false when there was nothing left to cancel.
    pub async fn cancel_user(&self, user_id: &UserId) -> Result<bool> {
        let canceller = {
            let sessions = self
                .sessions
                .read()
                .map_err(|_| PairingError::InternalError {
                    message: "Failed to acquire session registry lock".to_string(),
                })?;
            sessions.get(user_id).cloned()
        };

        match canceller {
            Some(canceller) => canceller.cancel().await,
            None => {
                debug!(
                    "Cancel request for '{}' matched no pending session",
                    user_id
                );
                Ok(false)
            }
        }
    }

    /// Delete Waiting entries old enough that no live session can own them
    ///
    /// A live waiter resolves at the wait timeout, so anything older than
    /// timeout plus grace belongs to a client that crashed mid-session.
    pub async fn sweep_stale_entries(&self) -> Result<usize> {
        let cutoff =
            current_timestamp() - chrono::Duration::seconds(self.config.stale_age_seconds() as i64);
        let swept = self.store.sweep_stale(cutoff).await?;

        if swept > 0 {
            if let Ok(mut stats) = self.stats.write() {
                stats.stale_reclaims += swept as u64;
            }
            self.metrics_collector.record_stale_reclaims(swept as u64);
            info!("Swept {} abandoned queue entries", swept);
        }

        Ok(swept)
    }

    /// Start the sweep task that runs periodically
    pub fn start_sweep_task(self: Arc<Self>) -> Result<()> {
        let engine = Arc::clone(&self);

        tokio::spawn(async move {
            let mut sweep_interval = interval(engine.config.sweep_interval());

            loop {
                sweep_interval.tick().await;

                if let Err(e) = engine.sweep_stale_entries().await {
                    error!("Error during stale entry sweep: {}", e);
                }
            }
        });

        info!("Started stale entry sweep task");
        Ok(())
    }

    /// Get current engine statistics
    pub async fn get_stats(&self) -> Result<PairingStats> {
        let stats = self
            .stats
            .read()
            .map_err(|_| PairingError::InternalError {
                message: "Failed to acquire stats lock".to_string(),
            })?;

        Ok(stats.clone())
    }

    /// Number of pending sessions live in this process
    pub fn pending_session_count(&self) -> usize {
        self.sessions
            .read()
            .map(|sessions| sessions.len())
            .unwrap_or(0)
    }

    /// Number of Waiting entries currently in the store
    pub async fn waiting_count(&self) -> Result<usize> {
        self.store.count_waiting().await
    }

    /// Pairing configuration in effect
    pub fn config(&self) -> &PairingConfig {
        &self.config
    }
}
