//! Planning and execution.
//!
//! The diff engine compares the desired graph with recorded state, the
//! scheduler orders the resulting operations into waves, and the executor
//! carries them out against providers.

mod diff;
mod executor;
mod plan;
mod retry;
mod schedule;

pub use diff::DiffEngine;
pub use executor::{
    DEFAULT_PARALLELISM, ExecutionReport, OperationOutcome, OperationResult, PlanExecutor,
};
pub use plan::{
    Action, AttributeChange, ChangeReason, DestroyTarget, ExecutionPlan, PlanMode, PlanOperation,
    PlannedValue,
};
pub use retry::RetryPolicy;
pub use schedule::PlanScheduler;
