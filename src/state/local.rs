//! Local file-based state storage backend.
//!
//! State lives in a single JSON file written through a temporary file and a
//! rename. An in-process mutex serializes read-modify-write cycles, and the
//! advisory lock file keeps other processes out.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Result, StateError, StratumError};
use crate::graph::ResourceId;

use super::lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
use super::store::StateStore;
use super::types::{HistoryEntry, StateEntry, StateSnapshot};

/// Default state directory name.
pub const STATE_DIR: &str = ".stratum";

/// State file name.
const STATE_FILE: &str = "state.json";

/// Lock file name.
const LOCK_FILE: &str = "state.lock";

/// Local file-based state store.
#[derive(Debug)]
pub struct LocalStateStore {
    /// Base directory for state files.
    base_dir: PathBuf,
    /// Path to the state file.
    state_path: PathBuf,
    /// Path to the lock file.
    lock_path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_guard: Mutex<()>,
}

impl LocalStateStore {
    /// Creates a store in `.stratum` under the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| StratumError::internal(format!("Cannot determine current directory: {e}")))?
            .join(STATE_DIR);

        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a store with a custom base directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let state_path = base_dir.join(STATE_FILE);
        let lock_path = base_dir.join(LOCK_FILE);

        Self {
            base_dir,
            state_path,
            lock_path,
            write_guard: Mutex::new(()),
        }
    }

    /// Path of the state file.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Ensures the state directory exists.
    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating state directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir).await.map_err(|e| {
                StateError::backend(format!("Failed to create state directory: {e}"))
            })?;
        }
        Ok(())
    }

    async fn read_snapshot(&self) -> Result<Option<StateSnapshot>> {
        if !self.state_path.exists() {
            debug!("State file does not exist: {}", self.state_path.display());
            return Ok(None);
        }

        let content = fs::read_to_string(&self.state_path)
            .await
            .map_err(|e| StateError::corrupted(format!("Failed to read state file: {e}")))?;

        Ok(Some(StateSnapshot::from_json(&content)?))
    }

    async fn write_snapshot(&self, snapshot: &StateSnapshot) -> Result<()> {
        self.ensure_dir().await?;
        let content = snapshot.to_json()?;

        // Write to a temporary file first, then rename for atomicity
        let temp_path = self.state_path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| StateError::backend(format!("Failed to create temp state file: {e}")))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| StateError::backend(format!("Failed to write state file: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| StateError::backend(format!("Failed to sync state file: {e}")))?;

        fs::rename(&temp_path, &self.state_path)
            .await
            .map_err(|e| StateError::backend(format!("Failed to rename state file: {e}")))?;

        debug!("State written at serial {}", snapshot.serial);
        Ok(())
    }

    /// Runs a read-modify-write cycle under the in-process guard. Nothing is
    /// written when `change` fails.
    async fn modify<T, F>(&self, change: F) -> Result<T>
    where
        F: FnOnce(&mut StateSnapshot) -> std::result::Result<T, StateError> + Send,
        T: Send,
    {
        let _guard = self.write_guard.lock().await;
        let mut snapshot = self.read_snapshot().await?.unwrap_or_default();
        let value = change(&mut snapshot)?;
        self.write_snapshot(&snapshot).await?;
        Ok(value)
    }

    /// Reads the lock file if it exists.
    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        if !self.lock_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.lock_path)
            .await
            .map_err(|e| StateError::corrupted(format!("Failed to read lock file: {e}")))?;

        let lock_info: LockInfo = serde_json::from_str(&content)
            .map_err(|e| StateError::corrupted(format!("Failed to parse lock file: {e}")))?;

        Ok(Some(lock_info))
    }

    /// Creates the lock file, failing if another process created it first.
    async fn create_lock_file(&self, lock_info: &LockInfo) -> Result<()> {
        self.ensure_dir().await?;

        let content = serde_json::to_string_pretty(lock_info)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
            .await
            .map_err(|e| StateError::LockFailed {
                message: format!("Failed to create lock file: {e}"),
            })?;

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| StateError::LockFailed {
                message: format!("Failed to write lock file: {e}"),
            })?;

        file.sync_all().await.map_err(|e| StateError::LockFailed {
            message: format!("Failed to sync lock file: {e}"),
        })?;

        Ok(())
    }

    /// Deletes the lock file.
    async fn delete_lock_file(&self) -> Result<()> {
        if self.lock_path.exists() {
            fs::remove_file(&self.lock_path)
                .await
                .map_err(|e| StateError::LockFailed {
                    message: format!("Failed to delete lock file: {e}"),
                })?;
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<StateSnapshot> {
        info!("Loading state from: {}", self.state_path.display());
        Ok(self.read_snapshot().await?.unwrap_or_default())
    }

    async fn get(&self, id: &ResourceId) -> Result<StateEntry> {
        self.read_snapshot()
            .await?
            .and_then(|s| s.entry(id).cloned())
            .ok_or_else(|| StateError::NotFound { id: id.to_string() }.into())
    }

    async fn commit_apply(
        &self,
        id: &ResourceId,
        entry: StateEntry,
        expected_version: u64,
    ) -> Result<StateEntry> {
        let committed = self
            .modify(|snapshot| snapshot.commit_apply(id, entry, expected_version))
            .await?;
        debug!("Committed {id} at version {}", committed.version);
        Ok(committed)
    }

    async fn commit_destroy(&self, id: &ResourceId, expected_version: u64) -> Result<()> {
        self.modify(|snapshot| snapshot.commit_destroy(id, expected_version))
            .await?;
        debug!("Removed {id} from state");
        Ok(())
    }

    async fn record_history(&self, entry: HistoryEntry) -> Result<()> {
        self.modify(|snapshot| {
            snapshot.add_history(entry);
            Ok(())
        })
        .await
    }

    async fn delete(&self) -> Result<()> {
        let _guard = self.write_guard.lock().await;
        if self.state_path.exists() {
            info!("Deleting state file: {}", self.state_path.display());
            fs::remove_file(&self.state_path)
                .await
                .map_err(|e| StateError::backend(format!("Failed to delete state file: {e}")))?;
        }

        self.delete_lock_file().await
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.state_path.exists())
    }

    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo> {
        if let Some(existing) = self.read_lock_file().await? {
            if !existing.is_expired() {
                return Err(StratumError::State(StateError::LockedByOther {
                    holder: existing.holder.clone(),
                    since: existing.acquired_at.to_rfc3339(),
                }));
            }
            debug!("Expired lock found, taking over");
            self.delete_lock_file().await?;
        }

        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };

        let lock_info = LockInfo::new(&holder_id, operation);
        self.create_lock_file(&lock_info).await?;

        info!(
            "Acquired state lock: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );

        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock_file().await? {
            if existing.lock_id == lock_id {
                self.delete_lock_file().await?;
                info!("Released state lock: {lock_id}");
            } else {
                debug!(
                    "Lock ID mismatch: expected {lock_id}, found {}",
                    existing.lock_id
                );
            }
        }
        Ok(())
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    async fn is_locked(&self) -> Result<bool> {
        if let Some(lock_info) = self.read_lock_file().await? {
            return Ok(!lock_info.is_expired());
        }
        Ok(false)
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}
