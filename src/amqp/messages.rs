//! AMQP message definitions and serialization

use crate::error::{PairingError, Result};
use crate::types::*;
use serde_json;

/// AMQP queue and exchange names
pub const PAIR_REQUEST_QUEUE: &str = "pairing.pair_requests";
pub const DEAD_LETTER_QUEUE: &str = "pairing.dead_letters";
pub const MATCH_EVENTS_EXCHANGE: &str = "switchboard.matches";
pub const SESSION_EVENTS_EXCHANGE: &str = "switchboard.sessions";

/// Routing keys for events
pub const USER_ENQUEUED_ROUTING_KEY: &str = "user.enqueued";
pub const MATCH_FOUND_ROUTING_KEY: &str = "match.found";
pub const SESSION_TIMED_OUT_ROUTING_KEY: &str = "session.timed_out";
pub const SESSION_CANCELLED_ROUTING_KEY: &str = "session.cancelled";

/// Message envelope with metadata
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub routing_key: String,
}

impl<T> MessageEnvelope<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    /// Create a new message envelope
    pub fn new(payload: T, routing_key: String) -> Self {
        Self {
            payload,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            routing_key,
        }
    }

    /// Serialize the envelope to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            PairingError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Deserialize envelope from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            PairingError::InvalidPairRequest {
                reason: format!("Failed to deserialize message: {}", e),
            }
            .into()
        })
    }
}

/// Message serialization and validation utilities
pub struct MessageUtils;

impl MessageUtils {
    /// Serialize a pair request in the tagged wire format
    pub fn serialize_pair_request(request: &PairRequest) -> Result<Vec<u8>> {
        Self::validate_pair_request(request)?;
        Self::serialize_message(&AmqpMessage::PairRequest(request.clone()))
    }

    /// Serialize a cancel request in the tagged wire format
    pub fn serialize_cancel_request(request: &CancelRequest) -> Result<Vec<u8>> {
        Self::validate_cancel_request(request)?;
        Self::serialize_message(&AmqpMessage::CancelRequest(request.clone()))
    }

    /// Deserialize a tagged message from bytes, validating request payloads
    pub fn deserialize_message(bytes: &[u8]) -> Result<AmqpMessage> {
        let message: AmqpMessage =
            serde_json::from_slice(bytes).map_err(|e| PairingError::InvalidPairRequest {
                reason: format!("Failed to deserialize message: {}", e),
            })?;

        match &message {
            AmqpMessage::PairRequest(request) => Self::validate_pair_request(request)?,
            AmqpMessage::CancelRequest(request) => Self::validate_cancel_request(request)?,
            _ => {}
        }

        Ok(message)
    }

    /// Validate a pair request
    pub fn validate_pair_request(request: &PairRequest) -> Result<()> {
        Self::validate_user_id(&request.user_id)
    }

    /// Validate a cancel request
    pub fn validate_cancel_request(request: &CancelRequest) -> Result<()> {
        Self::validate_user_id(&request.user_id)
    }

    fn validate_user_id(user_id: &UserId) -> Result<()> {
        if user_id.is_empty() {
            return Err(PairingError::InvalidPairRequest {
                reason: "User ID cannot be empty".to_string(),
            }
            .into());
        }

        if user_id.len() > 128 {
            return Err(PairingError::InvalidPairRequest {
                reason: "User ID exceeds 128 characters".to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// Serialize any AMQP message to bytes
    pub fn serialize_message<T: serde::Serialize>(message: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(message).map_err(|e| {
            PairingError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Get routing key for a message type
    pub fn get_routing_key(message: &AmqpMessage) -> &'static str {
        match message {
            AmqpMessage::PairRequest(_) => "pair.request",
            AmqpMessage::CancelRequest(_) => "pair.cancel",
            AmqpMessage::UserEnqueued(_) => USER_ENQUEUED_ROUTING_KEY,
            AmqpMessage::MatchFound(_) => MATCH_FOUND_ROUTING_KEY,
            AmqpMessage::SessionTimedOut(_) => SESSION_TIMED_OUT_ROUTING_KEY,
            AmqpMessage::SessionCancelled(_) => SESSION_CANCELLED_ROUTING_KEY,
        }
    }
}
