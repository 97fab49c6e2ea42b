//! Persisted state types.
//!
//! A [`StateSnapshot`] is the whole persisted document. Every backend
//! performs commits through [`StateSnapshot::commit_apply`] and
//! [`StateSnapshot::commit_destroy`], so the versioning rules live in one
//! place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::error::StateError;
use crate::graph::ResourceId;
use crate::provider::Attributes;

/// Current state format version.
pub const FORMAT_VERSION: &str = "1";

/// Maximum number of history entries kept.
pub const MAX_HISTORY: usize = 100;

/// The persisted state document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateSnapshot {
    /// State format version.
    pub format_version: String,
    /// Identifier assigned when the state was first created.
    pub lineage: String,
    /// Store-wide commit counter.
    pub serial: u64,
    /// Entries keyed by `type.name`.
    #[serde(default)]
    pub resources: BTreeMap<String, StateEntry>,
    /// Recent apply runs, oldest first.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// The recorded state of one resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateEntry {
    /// Resource identity.
    pub id: ResourceId,
    /// Provider-assigned identifier of the current object.
    pub provider_id: String,
    /// Last applied, fully resolved attribute values.
    #[serde(default)]
    pub attributes: Attributes,
    /// Outputs reported by the provider.
    #[serde(default)]
    pub outputs: Attributes,
    /// Resources this one depended on when last applied.
    #[serde(default)]
    pub dependencies: BTreeSet<ResourceId>,
    /// Version stamped by the store on every commit.
    #[serde(default)]
    pub version: u64,
    /// When the current object was created.
    pub created_at: DateTime<Utc>,
    /// When the entry was last committed.
    pub updated_at: DateTime<Utc>,
    /// Previous objects awaiting destruction.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deposed: Vec<DeposedObject>,
}

/// A previous object kept after a create-before-destroy replacement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeposedObject {
    /// Provider-assigned identifier of the old object.
    pub provider_id: String,
    /// When it was deposed.
    pub deposed_at: DateTime<Utc>,
}

/// A single entry in the apply history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Kind of run.
    pub operation: HistoryOperation,
    /// Fingerprint of the document applied.
    pub document_hash: String,
    /// Resources changed by the run.
    pub resources: Vec<String>,
    /// Whether every operation succeeded.
    pub success: bool,
    /// First error, if any.
    #[serde(default)]
    pub error: Option<String>,
}

/// Kinds of recorded runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HistoryOperation {
    /// Converging to the document.
    Apply,
    /// Destroying everything.
    Destroy,
}

impl StateSnapshot {
    /// Creates an empty snapshot with a fresh lineage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            format_version: FORMAT_VERSION.to_string(),
            lineage: Uuid::new_v4().to_string(),
            serial: 0,
            resources: BTreeMap::new(),
            history: Vec::new(),
        }
    }

    /// Rejects snapshots written in an unknown format.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedFormat` when the version tag is not understood.
    pub fn check_format(&self) -> Result<(), StateError> {
        if self.format_version == FORMAT_VERSION {
            Ok(())
        } else {
            Err(StateError::UnsupportedFormat {
                found: self.format_version.clone(),
                supported: FORMAT_VERSION.to_string(),
            })
        }
    }

    /// Decodes a persisted snapshot.
    ///
    /// # Errors
    ///
    /// Returns `Corrupted` for unparseable content and `UnsupportedFormat`
    /// for unknown format versions.
    pub fn from_json(content: &str) -> Result<Self, StateError> {
        let snapshot: Self = serde_json::from_str(content)
            .map_err(|e| StateError::corrupted(format!("Failed to parse state: {e}")))?;
        snapshot.check_format()?;
        Ok(snapshot)
    }

    /// Encodes the snapshot for persistence.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if encoding fails.
    pub fn to_json(&self) -> Result<String, StateError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))
    }

    /// Looks up an entry.
    #[must_use]
    pub fn entry(&self, id: &ResourceId) -> Option<&StateEntry> {
        self.resources.get(&id.to_string())
    }

    /// Stored version of a resource, 0 when absent.
    #[must_use]
    pub fn version_of(&self, id: &ResourceId) -> u64 {
        self.entry(id).map_or(0, |e| e.version)
    }

    /// Returns true if no resources are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Iterates over entries in identifier order.
    pub fn entries(&self) -> impl Iterator<Item = &StateEntry> {
        self.resources.values()
    }

    fn check_version(&self, id: &ResourceId, expected: u64) -> Result<(), StateError> {
        let found = self.version_of(id);
        if found == expected {
            Ok(())
        } else {
            Err(StateError::VersionConflict {
                id: id.to_string(),
                expected,
                found,
            })
        }
    }

    /// Stores an entry if the stored version matches `expected_version`.
    ///
    /// The committed entry is stamped with the next serial.
    ///
    /// # Errors
    ///
    /// Returns `VersionConflict` and leaves the snapshot untouched when the
    /// versions differ.
    pub fn commit_apply(
        &mut self,
        id: &ResourceId,
        mut entry: StateEntry,
        expected_version: u64,
    ) -> Result<StateEntry, StateError> {
        self.check_version(id, expected_version)?;

        self.serial += 1;
        entry.id = id.clone();
        entry.version = self.serial;
        entry.updated_at = Utc::now();
        self.resources.insert(id.to_string(), entry.clone());
        Ok(entry)
    }

    /// Removes an entry if the stored version matches `expected_version`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when there is nothing to remove and
    /// `VersionConflict` when the versions differ.
    pub fn commit_destroy(&mut self, id: &ResourceId, expected_version: u64) -> Result<(), StateError> {
        if self.entry(id).is_none() {
            return Err(StateError::NotFound { id: id.to_string() });
        }
        self.check_version(id, expected_version)?;

        self.serial += 1;
        self.resources.remove(&id.to_string());
        Ok(())
    }

    /// Appends a history entry, keeping the most recent [`MAX_HISTORY`].
    pub fn add_history(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
        if self.history.len() > MAX_HISTORY {
            let excess = self.history.len() - MAX_HISTORY;
            self.history.drain(..excess);
        }
    }
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl StateEntry {
    /// Creates an entry for a freshly created object.
    #[must_use]
    pub fn new(id: ResourceId, provider_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            provider_id: provider_id.into(),
            attributes: Attributes::new(),
            outputs: Attributes::new(),
            dependencies: BTreeSet::new(),
            version: 0,
            created_at: now,
            updated_at: now,
            deposed: Vec::new(),
        }
    }

    /// Sets the applied attributes.
    #[must_use]
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Sets the provider outputs.
    #[must_use]
    pub fn with_outputs(mut self, outputs: Attributes) -> Self {
        self.outputs = outputs;
        self
    }

    /// Sets the recorded dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, dependencies: BTreeSet<ResourceId>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Looks up an attribute, outputs first, `id` being the provider id.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<serde_json::Value> {
        if name == "id" {
            return Some(serde_json::Value::String(self.provider_id.clone()));
        }
        self.outputs
            .get(name)
            .or_else(|| self.attributes.get(name))
            .cloned()
    }
}

impl HistoryEntry {
    /// Creates a history entry.
    #[must_use]
    pub fn new(operation: HistoryOperation, document_hash: &str, resources: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            document_hash: document_hash.to_string(),
            resources,
            success: true,
            error: None,
        }
    }

    /// Marks the run as failed.
    #[must_use]
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

impl std::fmt::Display for HistoryOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Apply => "apply",
            Self::Destroy => "destroy",
        };
        write!(f, "{op}")
    }
}
