//! Execution plan types.
//!
//! A plan is the list of operations produced by the diff engine plus the
//! waves the scheduler ordered them into. Plans are never persisted.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;

use crate::graph::ResourceId;

/// What an operation does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Create a new remote object.
    Create,
    /// Change an existing object in place.
    Update,
    /// Destroy a remote object.
    Destroy,
    /// Nothing to do.
    NoOp,
}

/// Why an operation was planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeReason {
    /// Declared but not in state.
    New,
    /// Mutable attributes changed.
    Changed,
    /// In state but no longer declared, or a destroy run.
    Removed,
    /// An immutable attribute changed.
    Replace,
    /// A deposed object left by an earlier replacement.
    DeposedCleanup,
    /// Nothing changed.
    Unchanged,
}

/// Planned value of a changed attribute.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "value")]
pub enum PlannedValue {
    /// The value is known now. `null` means the attribute is removed.
    Known(Value),
    /// The value depends on an operation that has not run yet.
    Unknown,
}

/// One attribute-level change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeChange {
    /// Attribute name.
    pub name: String,
    /// Last applied value, if any.
    pub before: Option<Value>,
    /// Planned value.
    pub after: PlannedValue,
    /// Changing this attribute replaces the resource.
    pub forces_replacement: bool,
}

/// Which object a destroy removes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "provider_id")]
pub enum DestroyTarget {
    /// The resource's current object.
    Current,
    /// A deposed object with the given provider id.
    Deposed(String),
}

/// A single planned operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanOperation {
    /// Target resource.
    pub id: ResourceId,
    /// What to do.
    pub action: Action,
    /// Why.
    pub reason: ChangeReason,
    /// Attribute-level changes.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<AttributeChange>,
    /// State version observed when planning.
    pub expected_version: u64,
    /// Destroy target (destroy operations only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<DestroyTarget>,
    /// The create half of a replacement keeps the old object as deposed.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub create_before_destroy: bool,
}

/// Kind of run a plan was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanMode {
    /// Converge to the document.
    Apply,
    /// Destroy everything in state.
    Destroy,
}

/// A scheduled plan.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionPlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Fingerprint of the document the plan was built from.
    pub document_hash: String,
    /// Kind of run.
    pub mode: PlanMode,
    /// All operations, no-ops included.
    pub operations: Vec<PlanOperation>,
    /// Indices into `operations`, one list per wave.
    pub waves: Vec<Vec<usize>>,
    /// Direct ordering predecessors of each operation.
    #[serde(skip)]
    pub predecessors: Vec<BTreeSet<usize>>,
}

impl PlanOperation {
    /// Creates an operation with no changes and no destroy target.
    #[must_use]
    pub fn new(id: ResourceId, action: Action, reason: ChangeReason, expected_version: u64) -> Self {
        Self {
            id,
            action,
            reason,
            changes: Vec::new(),
            expected_version,
            target: None,
            create_before_destroy: false,
        }
    }

    /// Creates a destroy operation.
    #[must_use]
    pub fn destroy(id: ResourceId, reason: ChangeReason, expected_version: u64, target: DestroyTarget) -> Self {
        Self {
            target: Some(target),
            ..Self::new(id, Action::Destroy, reason, expected_version)
        }
    }

    /// Sets the attribute changes.
    #[must_use]
    pub fn with_changes(mut self, changes: Vec<AttributeChange>) -> Self {
        self.changes = changes;
        self
    }

    /// Returns true for destroys of deposed objects.
    #[must_use]
    pub const fn is_deposed_destroy(&self) -> bool {
        matches!(self.target, Some(DestroyTarget::Deposed(_)))
    }

    /// Returns true for destroys of the current object.
    #[must_use]
    pub const fn is_current_destroy(&self) -> bool {
        matches!(self.target, Some(DestroyTarget::Current))
    }

    /// Returns true for creates and updates.
    #[must_use]
    pub const fn is_create_or_update(&self) -> bool {
        matches!(self.action, Action::Create | Action::Update)
    }

    /// Returns a human-readable description of the operation.
    #[must_use]
    pub fn description(&self) -> String {
        match (&self.action, &self.target) {
            (Action::Create, _) if self.reason == ChangeReason::Replace => {
                format!("Create replacement for {}", self.id)
            }
            (Action::Create, _) => format!("Create {}", self.id),
            (Action::Update, _) => format!("Update {}", self.id),
            (Action::Destroy, Some(DestroyTarget::Deposed(provider_id))) => {
                format!("Destroy deposed object {provider_id} of {}", self.id)
            }
            (Action::Destroy, _) => format!("Destroy {}", self.id),
            (Action::NoOp, _) => format!("No change for {}", self.id),
        }
    }
}

impl ExecutionPlan {
    /// Returns true if the plan changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.iter().all(|op| op.action == Action::NoOp)
    }

    /// Number of operations with the given action.
    #[must_use]
    pub fn count(&self, action: Action) -> usize {
        self.operations.iter().filter(|op| op.action == action).count()
    }

    /// Number of operations that change something.
    #[must_use]
    pub fn change_count(&self) -> usize {
        self.operations.len() - self.count(Action::NoOp)
    }

    /// Scheduled operations in wave order.
    pub fn scheduled(&self) -> impl Iterator<Item = (usize, &PlanOperation)> {
        self.waves
            .iter()
            .flatten()
            .map(|&i| (i, &self.operations[i]))
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Destroy => "destroy",
            Self::NoOp => "no-op",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ChangeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::New => "new resource",
            Self::Changed => "attributes changed",
            Self::Removed => "removed from document",
            Self::Replace => "immutable attribute changed",
            Self::DeposedCleanup => "deposed object",
            Self::Unchanged => "unchanged",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PlannedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Known(Value::Null) => write!(f, "(removed)"),
            Self::Known(value) => write!(f, "{value}"),
            Self::Unknown => write!(f, "(known after apply)"),
        }
    }
}

impl std::fmt::Display for PlanOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.description(), self.reason)
    }
}

impl std::fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Execution Plan ({} changes):", self.change_count())?;
        for (wave_idx, wave) in self.waves.iter().enumerate() {
            writeln!(f, "  Wave {}:", wave_idx + 1)?;
            for &i in wave {
                writeln!(f, "    {}", self.operations[i])?;
            }
        }
        Ok(())
    }
}
