//! Utility functions for the pairing service

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generate a new unique queue entry ID
pub fn generate_entry_id() -> Uuid {
    Uuid::new_v4()
}

/// Generate a new correlation ID for message envelopes
pub fn generate_correlation_id() -> Uuid {
    Uuid::new_v4()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Derive the shared call channel name for a matched pair.
///
/// The pair is sorted lexicographically before truncation, so both sides
/// compute the same name without any coordination.
pub fn derive_channel_name(a: &str, b: &str) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    format!("call_{}_{}", id_prefix(first), id_prefix(second))
}

fn id_prefix(id: &str) -> String {
    id.chars().take(8).collect()
}

/// Seconds elapsed since the given timestamp, clamped at zero
pub fn seconds_since(timestamp: DateTime<Utc>) -> u64 {
    (Utc::now() - timestamp).num_seconds().max(0) as u64
}
