//! In-memory state backend.
//!
//! Useful for tests and for embedding the reconciler where persistence is
//! handled elsewhere.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Result, StateError, StratumError};
use crate::graph::ResourceId;

use super::lock::{generate_holder_id, LockInfo};
use super::store::StateStore;
use super::types::{HistoryEntry, StateEntry, StateSnapshot};

/// In-memory state store.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    snapshot: Mutex<Option<StateSnapshot>>,
    lock: Mutex<Option<LockInfo>>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with a snapshot.
    #[must_use]
    pub fn with_snapshot(snapshot: StateSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
            lock: Mutex::new(None),
        }
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<StateSnapshot> {
        Ok(self.snapshot.lock().await.clone().unwrap_or_default())
    }

    async fn get(&self, id: &ResourceId) -> Result<StateEntry> {
        self.snapshot
            .lock()
            .await
            .as_ref()
            .and_then(|s| s.entry(id).cloned())
            .ok_or_else(|| StateError::NotFound { id: id.to_string() }.into())
    }

    async fn commit_apply(
        &self,
        id: &ResourceId,
        entry: StateEntry,
        expected_version: u64,
    ) -> Result<StateEntry> {
        let mut guard = self.snapshot.lock().await;
        let snapshot = guard.get_or_insert_with(StateSnapshot::new);
        let committed = snapshot.commit_apply(id, entry, expected_version)?;
        debug!("Committed {id} at version {}", committed.version);
        Ok(committed)
    }

    async fn commit_destroy(&self, id: &ResourceId, expected_version: u64) -> Result<()> {
        let mut guard = self.snapshot.lock().await;
        let snapshot = guard.get_or_insert_with(StateSnapshot::new);
        snapshot.commit_destroy(id, expected_version)?;
        debug!("Removed {id} from state");
        Ok(())
    }

    async fn record_history(&self, entry: HistoryEntry) -> Result<()> {
        self.snapshot
            .lock()
            .await
            .get_or_insert_with(StateSnapshot::new)
            .add_history(entry);
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        *self.snapshot.lock().await = None;
        *self.lock.lock().await = None;
        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.snapshot.lock().await.is_some())
    }

    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo> {
        let mut guard = self.lock.lock().await;
        if let Some(existing) = guard.as_ref()
            && !existing.is_expired()
        {
            return Err(StratumError::State(StateError::LockedByOther {
                holder: existing.holder.clone(),
                since: existing.acquired_at.to_rfc3339(),
            }));
        }

        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };
        let info = LockInfo::new(&holder_id, operation);
        *guard = Some(info.clone());
        Ok(info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        let mut guard = self.lock.lock().await;
        if guard.as_ref().is_some_and(|l| l.lock_id == lock_id) {
            *guard = None;
        }
        Ok(())
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        Ok(self.lock.lock().await.clone())
    }

    async fn is_locked(&self) -> Result<bool> {
        Ok(self.lock.lock().await.as_ref().is_some_and(|l| !l.is_expired()))
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_commit_and_get() {
        let store = MemoryStateStore::new();
        let id = ResourceId::new("bucket", "logs");
        assert!(!assert_ok!(store.exists().await));

        let committed = assert_ok!(
            store
                .commit_apply(&id, StateEntry::new(id.clone(), "b-1"), 0)
                .await
        );
        assert_eq!(committed.version, 1);
        assert_eq!(assert_ok!(store.get(&id).await).provider_id, "b-1");

        assert_ok!(store.commit_destroy(&id, 1).await);
        assert_err!(store.get(&id).await);
    }

    #[tokio::test]
    async fn test_concurrent_creates_conflict() {
        let store = std::sync::Arc::new(MemoryStateStore::new());
        let id = ResourceId::new("bucket", "logs");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = std::sync::Arc::clone(&store);
                let id = id.clone();
                tokio::spawn(async move {
                    store
                        .commit_apply(&id, StateEntry::new(id.clone(), format!("b-{i}")), 0)
                        .await
                        .is_ok()
                })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.expect("task completes") {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_lock_cycle() {
        let store = MemoryStateStore::new();
        let lock = assert_ok!(store.acquire_lock("me", "apply").await);
        assert_err!(store.acquire_lock("you", "apply").await);

        store.release_lock("someone-else").await.expect("no-op release");
        assert!(assert_ok!(store.is_locked().await));

        assert_ok!(store.release_lock(&lock.lock_id).await);
        assert!(!assert_ok!(store.is_locked().await));
    }
}
