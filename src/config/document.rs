//! Desired-state document types.
//!
//! These structs map one-to-one onto `stratum.yaml`. Attribute values are
//! kept as raw JSON values here; references inside them are recognised later
//! by the graph builder.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::provider::ResourceSchema;

/// The root of a desired-state document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DesiredDocument {
    /// Project-level configuration.
    pub project: ProjectConfig,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Apply tuning.
    #[serde(default)]
    pub apply: ApplySettings,
    /// Providers serving the resource types used below.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// Declared resources.
    #[serde(default)]
    pub resources: Vec<ResourceDeclaration>,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Unique name for the project.
    pub name: String,
    /// Environment (e.g., "dev", "staging", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// State backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Backend type.
    #[serde(default)]
    pub backend: StateBackend,
    /// Local state directory (local backend).
    #[serde(default)]
    pub path: Option<String>,
    /// S3 bucket name (s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix.
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region, AWS default chain when absent.
    #[serde(default)]
    pub region: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based state storage.
    #[default]
    Local,
    /// AWS S3-based state storage.
    S3,
}

/// Executor tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplySettings {
    /// Maximum operations in flight within one wave.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Attempts per operation for retryable provider errors.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First backoff delay in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound for any backoff delay in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

/// A provider instance and the resource types it serves.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    /// Provider instance name.
    pub name: String,
    /// Implementation to use.
    pub kind: ProviderKind,
    /// Base URL (http providers).
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Environment variable holding a bearer token (http providers).
    #[serde(default)]
    pub token_env: Option<String>,
    /// Request timeout in seconds (http providers).
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Schemas of the resource types served.
    #[serde(default)]
    pub resources: Vec<ResourceSchema>,
}

/// Provider implementations shipped with stratum.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// In-process provider that fabricates identifiers.
    Local,
    /// Generic JSON-over-HTTP provider.
    Http,
}

/// A single resource declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceDeclaration {
    /// Resource type, served by one provider.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Logical name, unique within the type.
    pub name: String,
    /// Attribute values; strings of the form `${type.name.attr}` are references.
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
    /// Extra ordering dependencies as `type.name`.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Lifecycle flags.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

/// Lifecycle flags for a resource.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Create the replacement before destroying the old object.
    #[serde(default)]
    pub create_before_destroy: bool,
    /// Refuse any plan that destroys this resource.
    #[serde(default)]
    pub prevent_destroy: bool,
}

fn default_environment() -> String {
    String::from("dev")
}

const fn default_parallelism() -> usize {
    10
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_base_delay_ms() -> u64 {
    500
}

const fn default_max_delay_ms() -> u64 {
    10_000
}

impl Default for ApplySettings {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl DesiredDocument {
    /// Returns the project's qualified name.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}-{}", self.project.name, self.project.environment)
    }

    /// Returns all resource identifiers as `type.name`.
    #[must_use]
    pub fn resource_ids(&self) -> Vec<String> {
        self.resources.iter().map(ResourceDeclaration::address).collect()
    }
}

impl ResourceDeclaration {
    /// Returns the `type.name` address of this declaration.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}.{}", self.resource_type, self.name)
    }
}
