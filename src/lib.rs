//! Switchboard - Matchmaking service for one-on-one voice calls
//!
//! This crate provides AMQP-based matchmaking that pairs anonymous users
//! for private calls, built on an atomically claimable queue store,
//! per-session notification channels, and timeout supervision.

pub mod amqp;
pub mod config;
pub mod error;
pub mod metrics;
pub mod pairing;
pub mod service;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{PairingError, Result};
pub use types::*;

// Re-export key components
pub use amqp::publisher::EventPublisher;
pub use pairing::{EnqueueOutcome, PairingEngine, PendingSession};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
