//! Error types for the stratum reconciler.
//!
//! Errors are grouped by the stage that raises them: document loading and
//! graph construction, state management, provider calls, planning, and
//! apply orchestration.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the stratum reconciler.
#[derive(Debug, Error)]
pub enum StratumError {
    /// Configuration and graph-construction errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Resource provider errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Apply orchestration errors.
    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Desired-state document and graph-construction errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document file was not found.
    #[error("Document not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The document could not be parsed.
    #[error("Failed to parse document: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Document validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// Two resources share the same type and name.
    #[error("Duplicate resource: {id}")]
    DuplicateResource {
        /// The duplicated `type.name` identifier.
        id: String,
    },

    /// A reference points at an undeclared resource or unknown attribute.
    #[error("Unresolved reference in {consumer}: {reference} ({reason})")]
    UnresolvedReference {
        /// Resource holding the reference.
        consumer: String,
        /// The reference as written.
        reference: String,
        /// Why it could not be resolved.
        reason: String,
    },

    /// The resources reference each other in a cycle.
    #[error("Cyclic dependency: {}", cycle.join(" -> "))]
    CyclicDependency {
        /// Resources forming the cycle, first element repeated at the end.
        cycle: Vec<String>,
    },

    /// No registered provider handles the resource type.
    #[error("No provider registered for resource type '{resource_type}'")]
    UnknownResourceType {
        /// The unhandled resource type.
        resource_type: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// No state entry exists for the resource.
    #[error("No state entry for resource: {id}")]
    NotFound {
        /// The missing resource identifier.
        id: String,
    },

    /// The stored version differs from the expected one.
    #[error("Version conflict on {id}: expected version {expected}, found {found}")]
    VersionConflict {
        /// Resource whose commit was rejected.
        id: String,
        /// Version the writer based its change on.
        expected: u64,
        /// Version currently stored.
        found: u64,
    },

    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State was written by an incompatible format version.
    #[error("Unsupported state format version: {found} (supported: {supported})")]
    UnsupportedFormat {
        /// Version tag found in the stored state.
        found: String,
        /// Version tag this build understands.
        supported: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
    },

    /// Storage backend error.
    #[error("State backend error: {message}")]
    Backend {
        /// Description of the backend error.
        message: String,
    },
}

/// Errors returned by resource providers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Transport failure talking to the provider.
    #[error("Network error: {message}")]
    Network {
        /// Description of the network error.
        message: String,
    },

    /// The provider asked the caller to slow down.
    #[error("Throttled, retry after {retry_after_secs} seconds")]
    Throttled {
        /// Seconds the provider asked to wait.
        retry_after_secs: u64,
    },

    /// The provider is temporarily unavailable.
    #[error("Provider unavailable: {status} - {message}")]
    Unavailable {
        /// Status code reported by the provider.
        status: u16,
        /// Error message from the provider.
        message: String,
    },

    /// Authentication was rejected.
    #[error("Authentication failed: {message}")]
    Authentication {
        /// Description of the auth failure.
        message: String,
    },

    /// The provider rejected the request.
    #[error("Provider API error [{code}]: {message}")]
    Api {
        /// Provider error code, matched against schema retryable codes.
        code: String,
        /// Error message from the provider.
        message: String,
    },

    /// The remote object does not exist.
    #[error("Remote object not found: {provider_id}")]
    NotFound {
        /// Provider-assigned identifier.
        provider_id: String,
    },

    /// No provider is registered for the resource type.
    #[error("No provider for resource type '{resource_type}'")]
    UnknownResourceType {
        /// The unhandled resource type.
        resource_type: String,
    },

    /// The provider returned something unusable.
    #[error("Invalid provider response: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },

    /// The call was abandoned because the run was cancelled.
    #[error("Operation cancelled")]
    Cancelled,
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The scheduler could not order the operations.
    #[error("Cannot order plan operations, cycle through: {}", operations.join(", "))]
    CyclicPlan {
        /// Operations left unscheduled.
        operations: Vec<String>,
    },

    /// The plan would destroy a resource protected by `prevent_destroy`.
    #[error("Plan would destroy protected resource {id}")]
    PreventDestroy {
        /// The protected resource.
        id: String,
    },
}

/// Apply orchestration errors.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The apply run was aborted before execution.
    #[error("Apply aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },

    /// State kept changing underneath the run.
    #[error("Maximum plan attempts ({attempts}) exceeded after repeated version conflicts")]
    MaxAttemptsExceeded {
        /// Number of attempts made.
        attempts: u32,
    },
}

/// Result type alias for stratum operations.
pub type Result<T> = std::result::Result<T, StratumError>;

impl StratumError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true for errors raised while reading the document or
    /// building the plan, before any provider call.
    #[must_use]
    pub const fn is_plan_time(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Plan(PlanError::PreventDestroy { .. } | PlanError::CyclicPlan { .. })
        )
    }

    /// Returns true if this error is a state version conflict.
    #[must_use]
    pub const fn is_version_conflict(&self) -> bool {
        matches!(self, Self::State(StateError::VersionConflict { .. }))
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a parse error without location.
    #[must_use]
    pub fn parse(message: impl Into<String>) -> Self {
        Self::ParseError {
            message: message.into(),
            location: None,
        }
    }
}

impl StateError {
    /// Creates a backend error with the given message.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a corruption error with the given message.
    #[must_use]
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates an API error.
    #[must_use]
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Returns true for errors that are transient regardless of schema.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::Throttled { .. } | Self::Unavailable { .. }
        )
    }

    /// Returns the provider's requested wait, if it gave one.
    #[must_use]
    pub const fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::Throttled { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}
