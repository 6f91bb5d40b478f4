//! Queue store interface and implementations
//!
//! This module defines the shared table of waiting entries. All entry
//! mutations go through conditional operations so that two concurrent
//! pairing attempts can never both succeed against the same row.

use crate::error::{PairingError, Result};
use crate::types::{EntryId, EntryStatus, QueueEntry, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// Trait for queue store operations
///
/// `conditional_claim` and `delete_if_status` are compare-and-swap style:
/// they apply only if the entry's current status matches the expected one
/// and report a lost race as `Ok(false)`, never as an error.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a new entry and return its id
    async fn insert(&self, entry: QueueEntry) -> Result<EntryId>;

    /// Fetch a single entry by id
    async fn get(&self, id: EntryId) -> Result<Option<QueueEntry>>;

    /// Oldest Waiting entry owned by any user other than `excluding`
    async fn find_oldest_waiting(&self, excluding: &UserId) -> Result<Option<QueueEntry>>;

    /// Atomically transition `id` from `expected` to `new`, recording the
    /// claimant as the partner when the new status is Matched
    async fn conditional_claim(
        &self,
        id: EntryId,
        expected: EntryStatus,
        new: EntryStatus,
        matched_with: &UserId,
    ) -> Result<bool>;

    /// Atomically delete `id` if its status still matches `expected`
    async fn delete_if_status(&self, id: EntryId, expected: EntryStatus) -> Result<bool>;

    /// Remove every entry owned by `user_id`, regardless of status
    async fn delete_all_for_user(&self, user_id: &UserId) -> Result<usize>;

    /// Remove Waiting entries created before `cutoff` (crashed sessions)
    async fn sweep_stale(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Number of entries currently in the Waiting state
    async fn count_waiting(&self) -> Result<usize>;
}

/// In-memory queue store implementation
///
/// Conditional operations run inside a single write-lock critical section,
/// which gives them the required atomicity for a single-process deployment.
#[derive(Debug, Default)]
pub struct InMemoryQueueStore {
    entries: RwLock<HashMap<EntryId, QueueEntry>>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn read_entries(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<EntryId, QueueEntry>>> {
        self.entries
            .read()
            .map_err(|_| {
                PairingError::InternalError {
                    message: "Failed to acquire queue read lock".to_string(),
                }
                .into()
            })
    }

    fn write_entries(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<EntryId, QueueEntry>>> {
        self.entries
            .write()
            .map_err(|_| {
                PairingError::InternalError {
                    message: "Failed to acquire queue write lock".to_string(),
                }
                .into()
            })
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn insert(&self, entry: QueueEntry) -> Result<EntryId> {
        let mut entries = self.write_entries()?;
        let id = entry.id;
        debug!(
            "Inserting queue entry {} for user {} with status {}",
            id, entry.user_id, entry.status
        );
        entries.insert(id, entry);
        Ok(id)
    }

    async fn get(&self, id: EntryId) -> Result<Option<QueueEntry>> {
        let entries = self.read_entries()?;
        Ok(entries.get(&id).cloned())
    }

    async fn find_oldest_waiting(&self, excluding: &UserId) -> Result<Option<QueueEntry>> {
        let entries = self.read_entries()?;

        let candidate = entries
            .values()
            .filter(|entry| entry.is_waiting() && &entry.user_id != excluding)
            .min_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.id.cmp(&b.id))
            })
            .cloned();

        Ok(candidate)
    }

    async fn conditional_claim(
        &self,
        id: EntryId,
        expected: EntryStatus,
        new: EntryStatus,
        matched_with: &UserId,
    ) -> Result<bool> {
        let mut entries = self.write_entries()?;

        match entries.get_mut(&id) {
            Some(entry) if entry.status == expected => {
                entry.status = new;
                if new == EntryStatus::Matched {
                    entry.matched_with = Some(matched_with.clone());
                }
                debug!(
                    "Claimed entry {} ({} -> {}) for partner {}",
                    id, expected, new, matched_with
                );
                Ok(true)
            }
            // Missing or already transitioned: the caller lost the race
            _ => Ok(false),
        }
    }

    async fn delete_if_status(&self, id: EntryId, expected: EntryStatus) -> Result<bool> {
        let mut entries = self.write_entries()?;

        match entries.get(&id) {
            Some(entry) if entry.status == expected => {
                entries.remove(&id);
                debug!("Deleted entry {} while still {}", id, expected);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_all_for_user(&self, user_id: &UserId) -> Result<usize> {
        let mut entries = self.write_entries()?;

        let before = entries.len();
        entries.retain(|_, entry| &entry.user_id != user_id);
        let removed = before - entries.len();

        if removed > 0 {
            debug!("Removed {} stale entries for user {}", removed, user_id);
        }
        Ok(removed)
    }

    async fn sweep_stale(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut entries = self.write_entries()?;

        let before = entries.len();
        entries.retain(|_, entry| !(entry.is_waiting() && entry.created_at < cutoff));
        Ok(before - entries.len())
    }

    async fn count_waiting(&self) -> Result<usize> {
        let entries = self.read_entries()?;
        Ok(entries.values().filter(|entry| entry.is_waiting()).count())
    }
}

/// Behavior switches for the mock store
#[derive(Debug, Default)]
struct MockBehavior {
    fail_inserts: bool,
    fail_lookups: bool,
    /// Next N conditional claims report a lost race instead of succeeding
    deny_claims: usize,
}

/// Mock queue store for testing
///
/// Delegates to an in-memory store while recording inserts and allowing
/// transient store failures and lost claim races to be injected.
#[derive(Debug, Default)]
pub struct MockQueueStore {
    inner: InMemoryQueueStore,
    behavior: RwLock<MockBehavior>,
    insert_calls: RwLock<Vec<QueueEntry>>,
}

impl MockQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent inserts fail with a transient store error
    pub fn set_fail_inserts(&self, fail: bool) {
        if let Ok(mut behavior) = self.behavior.write() {
            behavior.fail_inserts = fail;
        }
    }

    /// Make subsequent reads fail with a transient store error
    pub fn set_fail_lookups(&self, fail: bool) {
        if let Ok(mut behavior) = self.behavior.write() {
            behavior.fail_lookups = fail;
        }
    }

    /// Force the next `count` conditional claims to lose their race
    pub fn deny_next_claims(&self, count: usize) {
        if let Ok(mut behavior) = self.behavior.write() {
            behavior.deny_claims = count;
        }
    }

    /// Get all recorded insert calls (for testing)
    pub fn get_insert_calls(&self) -> Vec<QueueEntry> {
        self.insert_calls
            .read()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    fn behavior_snapshot(&self) -> Result<(bool, bool)> {
        let behavior = self
            .behavior
            .read()
            .map_err(|_| PairingError::InternalError {
                message: "Failed to acquire mock behavior lock".to_string(),
            })?;
        Ok((behavior.fail_inserts, behavior.fail_lookups))
    }

    fn take_claim_denial(&self) -> Result<bool> {
        let mut behavior = self
            .behavior
            .write()
            .map_err(|_| PairingError::InternalError {
                message: "Failed to acquire mock behavior lock".to_string(),
            })?;
        if behavior.deny_claims > 0 {
            behavior.deny_claims -= 1;
            return Ok(true);
        }
        Ok(false)
    }
}

#[async_trait]
impl QueueStore for MockQueueStore {
    async fn insert(&self, entry: QueueEntry) -> Result<EntryId> {
        let (fail_inserts, _) = self.behavior_snapshot()?;
        if fail_inserts {
            return Err(PairingError::StoreUnavailable {
                message: "Injected insert failure".to_string(),
            }
            .into());
        }

        if let Ok(mut calls) = self.insert_calls.write() {
            calls.push(entry.clone());
        }
        self.inner.insert(entry).await
    }

    async fn get(&self, id: EntryId) -> Result<Option<QueueEntry>> {
        let (_, fail_lookups) = self.behavior_snapshot()?;
        if fail_lookups {
            return Err(PairingError::StoreUnavailable {
                message: "Injected lookup failure".to_string(),
            }
            .into());
        }
        self.inner.get(id).await
    }

    async fn find_oldest_waiting(&self, excluding: &UserId) -> Result<Option<QueueEntry>> {
        let (_, fail_lookups) = self.behavior_snapshot()?;
        if fail_lookups {
            return Err(PairingError::StoreUnavailable {
                message: "Injected lookup failure".to_string(),
            }
            .into());
        }
        self.inner.find_oldest_waiting(excluding).await
    }

    async fn conditional_claim(
        &self,
        id: EntryId,
        expected: EntryStatus,
        new: EntryStatus,
        matched_with: &UserId,
    ) -> Result<bool> {
        if self.take_claim_denial()? {
            return Ok(false);
        }
        self.inner
            .conditional_claim(id, expected, new, matched_with)
            .await
    }

    async fn delete_if_status(&self, id: EntryId, expected: EntryStatus) -> Result<bool> {
        self.inner.delete_if_status(id, expected).await
    }

    async fn delete_all_for_user(&self, user_id: &UserId) -> Result<usize> {
        self.inner.delete_all_for_user(user_id).await
    }

    async fn sweep_stale(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.inner.sweep_stale(cutoff).await
    }

    async fn count_waiting(&self) -> Result<usize> {
        self.inner.count_waiting().await
    }
}
