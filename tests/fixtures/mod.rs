//! Test fixtures and helpers for integration testing

use std::collections::HashMap;
use std::sync::Arc;

use switchboard::amqp::publisher::{EventPublisher, MockEventPublisher};
use switchboard::config::PairingConfig;
use switchboard::pairing::{
    EnqueueOutcome, InMemoryQueueStore, InProcessNotifier, MatchNotifier, PairingEngine,
    PendingSession, QueueStore,
};
use switchboard::types::UserId;

/// A complete in-process pairing system wired against test doubles
#[allow(dead_code)]
pub struct TestSystem {
    pub engine: PairingEngine,
    pub store: Arc<InMemoryQueueStore>,
    pub notifier: Arc<InProcessNotifier>,
    pub publisher: Arc<MockEventPublisher>,
}

/// Create a test system with the default short wait timeout
#[allow(dead_code)]
pub fn create_test_system() -> TestSystem {
    create_test_system_with_config(test_config(5))
}

/// Create a test system with a specific wait timeout in seconds
#[allow(dead_code)]
pub fn create_test_system_with_timeout(wait_timeout_seconds: u64) -> TestSystem {
    create_test_system_with_config(test_config(wait_timeout_seconds))
}

/// Create a test system from an explicit pairing configuration
pub fn create_test_system_with_config(config: PairingConfig) -> TestSystem {
    let store = Arc::new(InMemoryQueueStore::new());
    let notifier = Arc::new(InProcessNotifier::new());
    let publisher = Arc::new(MockEventPublisher::new());

    let engine = PairingEngine::new(
        Arc::clone(&store) as Arc<dyn QueueStore>,
        Arc::clone(&notifier) as Arc<dyn MatchNotifier>,
        Arc::clone(&publisher) as Arc<dyn EventPublisher>,
        config,
    );

    TestSystem {
        engine,
        store,
        notifier,
        publisher,
    }
}

/// Pairing configuration suitable for fast tests
pub fn test_config(wait_timeout_seconds: u64) -> PairingConfig {
    PairingConfig {
        wait_timeout_seconds,
        ..PairingConfig::default()
    }
}

/// Unwrap an enqueue outcome that must be a pending session
#[allow(dead_code)]
pub fn expect_pending(outcome: EnqueueOutcome) -> PendingSession {
    match outcome {
        EnqueueOutcome::Pending(session) => session,
        EnqueueOutcome::Matched { partner } => {
            panic!("expected a pending session, got a match with '{}'", partner)
        }
    }
}

/// Unwrap an enqueue outcome that must be an immediate match
#[allow(dead_code)]
pub fn expect_matched(outcome: EnqueueOutcome) -> UserId {
    match outcome {
        EnqueueOutcome::Matched { partner } => partner,
        EnqueueOutcome::Pending(_) => panic!("expected an immediate match"),
    }
}

/// Generate a numbered batch of user IDs with a common prefix
#[allow(dead_code)]
pub fn user_batch(prefix: &str, count: usize) -> Vec<UserId> {
    (0..count).map(|i| format!("{}_{}", prefix, i)).collect()
}

/// One user's finished trip through the engine: the partner they ended
/// up with, or None when the session timed out or was cancelled
#[allow(dead_code)]
pub type Resolution = (UserId, Option<UserId>);

/// Panic unless every reported pairing is mutual and nobody pairs twice
#[allow(dead_code)]
pub fn assert_pairs_are_symmetric(results: &[Resolution]) {
    let partners: HashMap<UserId, UserId> = results
        .iter()
        .filter_map(|(user, partner)| partner.clone().map(|p| (user.clone(), p)))
        .collect();

    for (user, partner) in &partners {
        assert_ne!(user, partner, "user {} was paired with itself", user);
        assert_eq!(
            partners.get(partner),
            Some(user),
            "{} saw partner {} but {} does not agree",
            user,
            partner,
            partner
        );
    }
}
