//! State store trait definition.

use async_trait::async_trait;

use super::lock::LockInfo;
use super::types::{HistoryEntry, StateEntry, StateSnapshot};
use crate::error::Result;
use crate::graph::ResourceId;

/// Trait for state storage backends.
///
/// Commits are compare-and-swap on the per-resource version: an
/// `expected_version` of 0 means the resource must be absent.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the whole snapshot, empty when nothing is stored.
    async fn load(&self) -> Result<StateSnapshot>;

    /// Gets one entry.
    ///
    /// Fails with `StateError::NotFound` when absent.
    async fn get(&self, id: &ResourceId) -> Result<StateEntry>;

    /// Stores an entry if the stored version equals `expected_version`.
    ///
    /// Returns the committed entry with its new version.
    async fn commit_apply(
        &self,
        id: &ResourceId,
        entry: StateEntry,
        expected_version: u64,
    ) -> Result<StateEntry>;

    /// Removes an entry if the stored version equals `expected_version`.
    async fn commit_destroy(&self, id: &ResourceId, expected_version: u64) -> Result<()>;

    /// Appends an apply history entry.
    async fn record_history(&self, entry: HistoryEntry) -> Result<()>;

    /// Deletes the stored state.
    async fn delete(&self) -> Result<()>;

    /// Checks if state exists.
    async fn exists(&self) -> Result<bool>;

    /// Acquires the advisory lock.
    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo>;

    /// Releases the lock if `lock_id` matches the current holder.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Gets current lock information if locked.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;

    /// Checks if the state is locked by an unexpired lock.
    async fn is_locked(&self) -> Result<bool>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}
