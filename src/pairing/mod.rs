//! Pairing subsystem for one-on-one call matchmaking
//!
//! This module holds the queue store, the per-entry notification channels,
//! the pending-session state machine, and the engine that runs the
//! claim-or-wait pairing algorithm on top of them.

pub mod engine;
pub mod notify;
pub mod session;
pub mod store;

// Re-export commonly used types
pub use engine::{EnqueueOutcome, PairingEngine, PairingStats};
pub use notify::{InProcessNotifier, MatchNotifier, MatchSignal, MatchSubscription};
pub use session::{PendingSession, SessionCanceller, SessionRegistry, TimeoutSupervisor};
pub use store::{InMemoryQueueStore, MockQueueStore, QueueStore};
