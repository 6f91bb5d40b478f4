//! Error types for the pairing service
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific pairing scenarios
#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Invalid pair request: {reason}")]
    InvalidPairRequest { reason: String },

    #[error("Queue store unavailable: {message}")]
    StoreUnavailable { message: String },

    #[error("Match subscription failed: {reason}")]
    SubscriptionFailed { reason: String },

    #[error("Notification channel already has a subscriber: {entry_id}")]
    ChannelConflict { entry_id: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}
