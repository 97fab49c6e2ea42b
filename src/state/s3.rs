//! S3-based state storage backend.
//!
//! The snapshot is one JSON object and the lock is a second object beside
//! it. Commits are read-modify-write cycles serialized within the process;
//! across processes the advisory lock is what keeps writers apart.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Result, StateError, StratumError};
use crate::graph::ResourceId;

use super::lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
use super::store::StateStore;
use super::types::{HistoryEntry, StateEntry, StateSnapshot};

/// State object key suffix.
const STATE_KEY: &str = "state.json";

/// Lock object key suffix.
const LOCK_KEY: &str = "state.lock";

/// S3-based state store.
#[derive(Debug)]
pub struct S3StateStore {
    /// S3 client.
    client: Client,
    /// Bucket name.
    bucket: String,
    /// Key prefix, empty or ending with `/`.
    prefix: String,
    /// Serializes read-modify-write cycles within this process.
    write_guard: Mutex<()>,
}

impl S3StateStore {
    /// Creates a new S3 state store.
    ///
    /// # Errors
    ///
    /// Returns an error if the S3 client cannot be initialized.
    pub async fn new(bucket: &str, prefix: Option<&str>, region: Option<&str>) -> Result<Self> {
        let config = if let Some(region_str) = region {
            aws_config::from_env()
                .region(aws_config::Region::new(region_str.to_string()))
                .load()
                .await
        } else {
            aws_config::load_from_env().await
        };

        Ok(Self::with_client(Client::new(&config), bucket, prefix))
    }

    /// Creates a new S3 state store with an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, prefix: Option<&str>) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: normalize_prefix(prefix),
            write_guard: Mutex::new(()),
        }
    }

    /// Gets the full S3 key for a file.
    fn key(&self, file: &str) -> String {
        format!("{}{file}", self.prefix)
    }

    /// Gets an object from S3.
    async fn get_object(&self, key: &str) -> Result<Option<String>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(response) => {
                let bytes = response
                    .body
                    .collect()
                    .await
                    .map_err(|e| StateError::backend(format!("Failed to read S3 object: {e}")))?;

                let content = String::from_utf8(bytes.to_vec())
                    .map_err(|e| StateError::corrupted(format!("Invalid UTF-8 in S3 object: {e}")))?;

                Ok(Some(content))
            }
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(StateError::backend(format!("S3 get error: {service_err}")).into())
                }
            }
        }
    }

    /// Puts an object to S3.
    async fn put_object(&self, key: &str, content: String) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(content.into_bytes().into())
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| StateError::backend(format!("S3 put error: {e}")))?;

        Ok(())
    }

    /// Deletes an object from S3.
    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StateError::backend(format!("S3 delete error: {e}")))?;

        Ok(())
    }

    /// Checks if an object exists in S3.
    async fn object_exists(&self, key: &str) -> Result<bool> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(StateError::backend(format!("S3 head error: {service_err}")).into())
                }
            }
        }
    }

    async fn read_snapshot(&self) -> Result<Option<StateSnapshot>> {
        let key = self.key(STATE_KEY);
        debug!("Loading state from s3://{}/{key}", self.bucket);

        match self.get_object(&key).await? {
            Some(json) => Ok(Some(StateSnapshot::from_json(&json)?)),
            None => Ok(None),
        }
    }

    async fn modify<T, F>(&self, change: F) -> Result<T>
    where
        F: FnOnce(&mut StateSnapshot) -> std::result::Result<T, StateError> + Send,
        T: Send,
    {
        let _guard = self.write_guard.lock().await;
        let mut snapshot = self.read_snapshot().await?.unwrap_or_default();
        let value = change(&mut snapshot)?;
        self.put_object(&self.key(STATE_KEY), snapshot.to_json()?)
            .await?;
        Ok(value)
    }

    async fn read_lock(&self) -> Result<Option<LockInfo>> {
        let Some(content) = self.get_object(&self.key(LOCK_KEY)).await? else {
            return Ok(None);
        };
        let lock_info = serde_json::from_str(&content)
            .map_err(|e| StateError::corrupted(format!("Failed to parse lock: {e}")))?;
        Ok(Some(lock_info))
    }
}

/// Normalizes a key prefix to either empty or `segment/`.
fn normalize_prefix(prefix: Option<&str>) -> String {
    prefix
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .map(|p| format!("{p}/"))
        .unwrap_or_default()
}

#[async_trait]
impl StateStore for S3StateStore {
    async fn load(&self) -> Result<StateSnapshot> {
        let snapshot = self.read_snapshot().await?.unwrap_or_default();
        info!(
            "Loaded state from s3://{}/{} ({} resource(s))",
            self.bucket,
            self.key(STATE_KEY),
            snapshot.resources.len()
        );
        Ok(snapshot)
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
            .await
    }

    async fn record_history(&self, entry: HistoryEntry) -> Result<()> {
        self.modify(|snapshot| {
            snapshot.add_history(entry);
            Ok(())
        })
        .await
    }

    async fn delete(&self) -> Result<()> {
        let state_key = self.key(STATE_KEY);
        info!("Deleting state from s3://{}/{state_key}", self.bucket);

        let _guard = self.write_guard.lock().await;
        self.delete_object(&state_key).await?;
        self.delete_object(&self.key(LOCK_KEY)).await
    }

    async fn exists(&self) -> Result<bool> {
        self.object_exists(&self.key(STATE_KEY)).await
    }

    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo> {
        if let Some(existing) = self.read_lock().await? {
            if !existing.is_expired() {
                return Err(StratumError::State(StateError::LockedByOther {
                    holder: existing.holder.clone(),
                    since: existing.acquired_at.to_rfc3339(),
                }));
            }
            debug!("Expired lock found, taking over");
        }

        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };

        let lock_info = LockInfo::new(&holder_id, operation);
        let content = serde_json::to_string_pretty(&lock_info)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;
        self.put_object(&self.key(LOCK_KEY), content).await?;

        info!(
            "Acquired state lock: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );

        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock().await? {
            if existing.lock_id == lock_id {
                self.delete_object(&self.key(LOCK_KEY)).await?;
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
        self.read_lock().await
    }

    async fn is_locked(&self) -> Result<bool> {
        Ok(self.read_lock().await?.is_some_and(|l| !l.is_expired()))
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}
