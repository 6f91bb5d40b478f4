//! Common types used throughout the pairing service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier for a caller, issued by the identity collaborator
pub type UserId = String;

/// Unique identifier for queue entries
pub type EntryId = Uuid;

/// Lifecycle state of a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryStatus {
    Waiting,
    Matched,
    Cancelled,
}

impl EntryStatus {
    /// Terminal entries never transition again and are eligible for deletion
    pub fn is_terminal(&self) -> bool {
        matches!(self, EntryStatus::Matched | EntryStatus::Cancelled)
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryStatus::Waiting => write!(f, "Waiting"),
            EntryStatus::Matched => write!(f, "Matched"),
            EntryStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// A single row in the shared waiting queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: EntryId,
    pub user_id: UserId,
    pub status: EntryStatus,
    /// Partner identity, set exactly once when the entry transitions to Matched
    pub matched_with: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl QueueEntry {
    /// Create a fresh entry in the Waiting state
    pub fn waiting(user_id: UserId) -> Self {
        Self {
            id: crate::utils::generate_entry_id(),
            user_id,
            status: EntryStatus::Waiting,
            matched_with: None,
            created_at: crate::utils::current_timestamp(),
        }
    }

    /// Create an already-matched entry recording the claimant's side of a pairing
    pub fn matched(user_id: UserId, partner: UserId) -> Self {
        Self {
            id: crate::utils::generate_entry_id(),
            user_id,
            status: EntryStatus::Matched,
            matched_with: Some(partner),
            created_at: crate::utils::current_timestamp(),
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.status == EntryStatus::Waiting
    }
}

/// Terminal outcome of a pairing session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchOutcome {
    /// Paired with the given partner
    Matched { partner: UserId },
    /// No partner arrived within the configured wait
    TimedOut,
    /// Cancellation won the race against any incoming claim
    Cancelled,
}

impl std::fmt::Display for MatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchOutcome::Matched { partner } => write!(f, "Matched({})", partner),
            MatchOutcome::TimedOut => write!(f, "TimedOut"),
            MatchOutcome::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Joinable session descriptor handed to both sides of a pairing.
///
/// Both clients derive the same channel name independently, so no extra
/// coordination round-trip is needed before contacting the token issuer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallDescriptor {
    pub channel_name: String,
    /// Advisory credential lifetime for the token-issuing collaborator
    pub ttl_secs: u64,
}

impl CallDescriptor {
    pub fn for_pair(a: &UserId, b: &UserId, ttl_secs: u64) -> Self {
        Self {
            channel_name: crate::utils::derive_channel_name(a, b),
            ttl_secs,
        }
    }
}

/// AMQP Message Types
/// Request to pair the given user with the oldest compatible waiter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairRequest {
    pub user_id: UserId,
    pub timestamp: DateTime<Utc>,
}

/// Request to cancel the user's pending session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequest {
    pub user_id: UserId,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted when a user becomes a waiter in the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEnqueued {
    pub entry_id: EntryId,
    pub user_id: UserId,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted exactly once per pairing, by the claiming side
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchFound {
    pub user_id: UserId,
    pub partner_id: UserId,
    pub call: CallDescriptor,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted when a pending session expires without a partner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTimedOut {
    pub entry_id: EntryId,
    pub user_id: UserId,
    pub waited_secs: u64,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted when a cancellation wins the race against a match
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCancelled {
    pub entry_id: EntryId,
    pub user_id: UserId,
    pub timestamp: DateTime<Utc>,
}

/// Union type for all AMQP messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AmqpMessage {
    PairRequest(PairRequest),
    CancelRequest(CancelRequest),
    UserEnqueued(UserEnqueued),
    MatchFound(MatchFound),
    SessionTimedOut(SessionTimedOut),
    SessionCancelled(SessionCancelled),
}
