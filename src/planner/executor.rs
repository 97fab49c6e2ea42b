//! Plan executor.
//!
//! Waves run one after another. Operations inside a wave run concurrently,
//! bounded by a semaphore, and every confirmed change is committed to the
//! state store under the version the plan observed. An operation whose
//! predecessor did not succeed is skipped rather than attempted.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelSignal;
use crate::error::{ProviderError, Result, StateError, StratumError};
use crate::graph::{Reference, ResourceGraph, ResourceId, ResourceNode};
use crate::provider::{
    Attributes, OperationContext, ProviderRegistry, ResourceProvider, ResourceSchema,
};
use crate::state::{DeposedObject, StateEntry, StateSnapshot, StateStore};

use super::plan::{Action, DestroyTarget, ExecutionPlan, PlanOperation};
use super::retry::RetryPolicy;

/// Default number of operations in flight per wave.
pub const DEFAULT_PARALLELISM: usize = 10;

/// Executes scheduled plans against providers and the state store.
pub struct PlanExecutor {
    registry: ProviderRegistry,
    store: Arc<dyn StateStore>,
    retry: RetryPolicy,
    parallelism: usize,
    cancel: CancelSignal,
}

/// How one operation ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum OperationOutcome {
    /// The provider confirmed the change and state was committed.
    Succeeded {
        /// Outputs reported by the provider, `id` included.
        outputs: Attributes,
    },
    /// Nothing to do.
    Unchanged,
    /// The operation was attempted and failed.
    Failed {
        /// Error description.
        error: String,
    },
    /// Not attempted because a predecessor did not succeed.
    SkippedDependencyFailed {
        /// The predecessor that failed, was skipped, or was cancelled.
        dependency: String,
    },
    /// Not attempted, or abandoned, because the run was cancelled.
    Cancelled,
}

/// Result of one planned operation.
#[derive(Debug, Clone, Serialize)]
pub struct OperationResult {
    /// Position in the plan.
    pub index: usize,
    /// Target resource.
    pub id: ResourceId,
    /// Planned action.
    pub action: Action,
    /// Outcome.
    pub outcome: OperationOutcome,
    /// Provider attempts made.
    pub attempts: u32,
    /// The failure was a stale state version.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub version_conflict: bool,
}

/// Result of executing a whole plan.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    /// One result per planned operation, in plan order.
    pub results: Vec<OperationResult>,
    /// Operations that succeeded.
    pub succeeded: usize,
    /// No-op operations.
    pub unchanged: usize,
    /// Operations that failed.
    pub failed: usize,
    /// Operations skipped after a dependency failure.
    pub skipped: usize,
    /// Operations cancelled.
    pub cancelled: usize,
    /// Failures caused by stale state versions.
    pub version_conflicts: usize,
    /// Whether every operation succeeded or was unchanged.
    pub success: bool,
}

/// What a successful operation changed in state.
#[derive(Debug)]
enum Committed {
    Entry(StateEntry),
    Removed,
}

/// Why an operation did not succeed.
#[derive(Debug)]
enum Failure {
    Cancelled,
    Error {
        message: String,
        version_conflict: bool,
    },
}

impl From<ProviderError> for Failure {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Cancelled => Self::Cancelled,
            other => Self::Error {
                message: other.to_string(),
                version_conflict: false,
            },
        }
    }
}

impl From<StratumError> for Failure {
    fn from(err: StratumError) -> Self {
        Self::Error {
            version_conflict: err.is_version_conflict(),
            message: err.to_string(),
        }
    }
}

impl Failure {
    fn message(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            version_conflict: false,
        }
    }
}

/// Everything one spawned operation needs, owned.
struct OperationTask {
    index: usize,
    op: PlanOperation,
    provider: Arc<dyn ResourceProvider>,
    schema: ResourceSchema,
    store: Arc<dyn StateStore>,
    retry: RetryPolicy,
    cancel: CancelSignal,
    expected_version: u64,
    desired: Attributes,
    dependencies: BTreeSet<ResourceId>,
}

/// Outcome of a spawned operation, reported back to the wave loop.
struct TaskOutput {
    index: usize,
    outcome: std::result::Result<(Attributes, Committed), Failure>,
    attempts: u32,
}

impl PlanExecutor {
    /// Creates an executor with default retry and parallelism settings.
    #[must_use]
    pub fn new(registry: ProviderRegistry, store: Arc<dyn StateStore>) -> Self {
        Self {
            registry,
            store,
            retry: RetryPolicy::default(),
            parallelism: DEFAULT_PARALLELISM,
            cancel: CancelSignal::new(),
        }
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the number of operations in flight per wave.
    #[must_use]
    pub const fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Sets the cancellation signal.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Executes a plan.
    ///
    /// `snapshot` must be the state the plan was built from; it seeds the
    /// values used to resolve references. `graph` supplies desired attributes
    /// for creates and updates and may be absent for destroy-only plans.
    ///
    /// # Errors
    ///
    /// Returns an error only if an operation task panics. Operation failures
    /// are reported in the [`ExecutionReport`].
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        graph: Option<&ResourceGraph>,
        snapshot: &StateSnapshot,
    ) -> Result<ExecutionReport> {
        info!(
            "Executing plan: {} operation(s) in {} wave(s)",
            plan.change_count(),
            plan.waves.len()
        );

        let mut known: BTreeMap<ResourceId, StateEntry> = snapshot
            .entries()
            .map(|entry| (entry.id.clone(), entry.clone()))
            .collect();
        let mut versions: BTreeMap<ResourceId, u64> = BTreeMap::new();
        let mut results: Vec<Option<OperationResult>> = vec![None; plan.operations.len()];
        let semaphore = Arc::new(Semaphore::new(self.parallelism.max(1)));

        for (wave_idx, wave) in plan.waves.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!("Run cancelled, not starting wave {}", wave_idx + 1);
                break;
            }
            debug!("Starting wave {} ({} operation(s))", wave_idx + 1, wave.len());

            let mut join_set = JoinSet::new();
            for &index in wave {
                let op = &plan.operations[index];

                let blocker = plan.predecessors[index].iter().find(|&&p| {
                    results[p]
                        .as_ref()
                        .is_none_or(|r| !matches!(r.outcome, OperationOutcome::Succeeded { .. }))
                });
                if let Some(&blocker) = blocker {
                    warn!("Skipping {}: {} did not succeed", op.description(), plan.operations[blocker].id);
                    results[index] = Some(result_for(
                        index,
                        op,
                        OperationOutcome::SkippedDependencyFailed {
                            dependency: plan.operations[blocker].id.to_string(),
                        },
                        0,
                    ));
                    continue;
                }

                match self.prepare(index, op, graph, &known, &versions) {
                    Ok(task) => {
                        join_set.spawn(task.run(Arc::clone(&semaphore)));
                    }
                    Err(message) => {
                        error!("Cannot start {}: {message}", op.description());
                        results[index] = Some(result_for(index, op, OperationOutcome::Failed { error: message }, 0));
                    }
                }
            }

            while let Some(joined) = join_set.join_next().await {
                let output = joined
                    .map_err(|e| StratumError::internal(format!("Operation task failed: {e}")))?;
                let op = &plan.operations[output.index];

                let mut version_conflict = false;
                let outcome = match output.outcome {
                    Ok((outputs, committed)) => {
                        match committed {
                            Committed::Entry(entry) => {
                                versions.insert(op.id.clone(), entry.version);
                                known.insert(op.id.clone(), entry);
                            }
                            Committed::Removed => {
                                versions.insert(op.id.clone(), 0);
                                known.remove(&op.id);
                            }
                        }
                        info!("{} succeeded", op.description());
                        OperationOutcome::Succeeded { outputs }
                    }
                    Err(Failure::Cancelled) => {
                        warn!("{} cancelled", op.description());
                        OperationOutcome::Cancelled
                    }
                    Err(Failure::Error {
                        message,
                        version_conflict: conflict,
                    }) => {
                        error!("{} failed: {message}", op.description());
                        version_conflict = conflict;
                        OperationOutcome::Failed { error: message }
                    }
                };

                let mut result = result_for(output.index, op, outcome, output.attempts);
                result.version_conflict = version_conflict;
                results[output.index] = Some(result);
            }
        }

        let results: Vec<OperationResult> = plan
            .operations
            .iter()
            .enumerate()
            .zip(results)
            .map(|((index, op), result)| {
                result.unwrap_or_else(|| {
                    let outcome = if op.action == Action::NoOp {
                        OperationOutcome::Unchanged
                    } else {
                        OperationOutcome::Cancelled
                    };
                    result_for(index, op, outcome, 0)
                })
            })
            .collect();

        let report = ExecutionReport::from_results(results);
        info!("{report}");
        Ok(report)
    }

    /// Resolves everything an operation needs before it is spawned.
    fn prepare(
        &self,
        index: usize,
        op: &PlanOperation,
        graph: Option<&ResourceGraph>,
        known: &BTreeMap<ResourceId, StateEntry>,
        versions: &BTreeMap<ResourceId, u64>,
    ) -> std::result::Result<OperationTask, String> {
        let provider = self
            .registry
            .provider(&op.id.resource_type)
            .map_err(|e| e.to_string())?;
        let schema = self
            .registry
            .schema(&op.id.resource_type)
            .cloned()
            .ok_or_else(|| format!("no schema for resource type '{}'", op.id.resource_type))?;

        let (desired, dependencies) = if op.is_create_or_update() {
            let node = graph
                .and_then(|g| g.node(&op.id))
                .ok_or_else(|| format!("{} is not in the desired graph", op.id))?;
            let dependencies = graph.map(|g| g.dependencies(&op.id)).unwrap_or_default();
            (resolve_desired(node, known)?, dependencies)
        } else {
            (Attributes::new(), BTreeSet::new())
        };

        Ok(OperationTask {
            index,
            op: op.clone(),
            provider,
            schema,
            store: Arc::clone(&self.store),
            retry: self.retry,
            cancel: self.cancel.clone(),
            expected_version: versions.get(&op.id).copied().unwrap_or(op.expected_version),
            desired,
            dependencies,
        })
    }
}

impl std::fmt::Debug for PlanExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanExecutor")
            .field("registry", &self.registry)
            .field("backend", &self.store.backend_type())
            .field("retry", &self.retry)
            .field("parallelism", &self.parallelism)
            .finish_non_exhaustive()
    }
}

/// Resolves a node's declared attributes against recorded entries.
fn resolve_desired(
    node: &ResourceNode,
    known: &BTreeMap<ResourceId, StateEntry>,
) -> std::result::Result<Attributes, String> {
    let lookup = |reference: &Reference| {
        known
            .get(&reference.producer)
            .map(|entry| entry.attribute(&reference.attribute).unwrap_or(Value::Null))
    };

    node.attributes
        .iter()
        .map(|(name, expr)| {
            expr.resolve(&lookup)
                .map(|value| (name.clone(), value))
                .ok_or_else(|| format!("attribute '{name}' references a resource with no recorded state"))
        })
        .collect()
}

fn result_for(index: usize, op: &PlanOperation, outcome: OperationOutcome, attempts: u32) -> OperationResult {
    OperationResult {
        index,
        id: op.id.clone(),
        action: op.action,
        outcome,
        attempts,
        version_conflict: false,
    }
}

impl OperationTask {
    async fn run(self, semaphore: Arc<Semaphore>) -> TaskOutput {
        let mut attempts = 0;
        let outcome = match semaphore.acquire().await {
            Ok(_permit) => self.perform(&mut attempts).await,
            Err(e) => Err(Failure::message(format!("executor shut down: {e}"))),
        };

        TaskOutput {
            index: self.index,
            outcome,
            attempts,
        }
    }

    async fn perform(&self, attempts: &mut u32) -> std::result::Result<(Attributes, Committed), Failure> {
        if self.cancel.is_cancelled() {
            return Err(Failure::Cancelled);
        }
        debug!("{} starting", self.op.description());

        let stored = self.precheck().await?;
        match (&self.op.action, &self.op.target) {
            (Action::Create, _) => self.create(stored, attempts).await,
            (Action::Update, _) => self.update(required(stored, &self.op.id)?, attempts).await,
            (Action::Destroy, Some(DestroyTarget::Deposed(provider_id))) => {
                self.destroy_deposed(required(stored, &self.op.id)?, provider_id, attempts)
                    .await
            }
            (Action::Destroy, _) => self.destroy(required(stored, &self.op.id)?, attempts).await,
            (Action::NoOp, _) => Err(Failure::message("no-op operations are not executed")),
        }
    }

    /// Checks the stored version before any provider call.
    async fn precheck(&self) -> std::result::Result<Option<StateEntry>, Failure> {
        let conflict = |found: u64| -> Failure {
            StratumError::from(StateError::VersionConflict {
                id: self.op.id.to_string(),
                expected: self.expected_version,
                found,
            })
            .into()
        };

        match self.store.get(&self.op.id).await {
            Ok(entry) if entry.version == self.expected_version => Ok(Some(entry)),
            Ok(entry) => Err(conflict(entry.version)),
            Err(StratumError::State(StateError::NotFound { .. })) if self.expected_version == 0 => Ok(None),
            Err(StratumError::State(StateError::NotFound { .. })) => Err(conflict(0)),
            Err(e) => Err(e.into()),
        }
    }

    fn context(&self, attempt: u32) -> OperationContext {
        let mut ctx = OperationContext::new(self.op.id.clone(), self.cancel.clone());
        ctx.attempt = attempt;
        ctx
    }

    async fn create(
        &self,
        stored: Option<StateEntry>,
        attempts: &mut u32,
    ) -> std::result::Result<(Attributes, Committed), Failure> {
        let (response, made) = self
            .retry
            .run(&self.schema, &self.cancel, |attempt| {
                let ctx = self.context(attempt);
                async move { self.provider.create(&ctx, &self.desired).await }
            })
            .await;
        *attempts = made;
        let response = response?;

        let mut entry = StateEntry::new(self.op.id.clone(), response.id.clone())
            .with_attributes(self.desired.clone())
            .with_outputs(response.outputs.clone())
            .with_dependencies(self.dependencies.clone());
        if self.op.create_before_destroy
            && let Some(old) = stored
        {
            entry.deposed = old.deposed;
            entry.deposed.push(DeposedObject {
                provider_id: old.provider_id,
                deposed_at: Utc::now(),
            });
        }

        let committed = self
            .store
            .commit_apply(&self.op.id, entry, self.expected_version)
            .await
            .inspect_err(|e| {
                error!(
                    "{} was created as {} but could not be recorded: {e}",
                    self.op.id, response.id
                );
            })?;
        Ok((response.outputs_with_id(), Committed::Entry(committed)))
    }

    async fn update(
        &self,
        stored: StateEntry,
        attempts: &mut u32,
    ) -> std::result::Result<(Attributes, Committed), Failure> {
        let changes: Attributes = self
            .op
            .changes
            .iter()
            .map(|change| {
                let value = self.desired.get(&change.name).cloned().unwrap_or(Value::Null);
                (change.name.clone(), value)
            })
            .collect();

        let (response, made) = self
            .retry
            .run(&self.schema, &self.cancel, |attempt| {
                let ctx = self.context(attempt);
                let provider_id = stored.provider_id.clone();
                let changes = &changes;
                async move { self.provider.update(&ctx, &provider_id, changes).await }
            })
            .await;
        *attempts = made;
        let response = response?;

        let mut entry = stored;
        entry.provider_id.clone_from(&response.id);
        entry.attributes = self.desired.clone();
        entry.outputs = response.outputs.clone();
        entry.dependencies = self.dependencies.clone();

        let committed = self
            .store
            .commit_apply(&self.op.id, entry, self.expected_version)
            .await?;
        Ok((response.outputs_with_id(), Committed::Entry(committed)))
    }

    async fn destroy(
        &self,
        stored: StateEntry,
        attempts: &mut u32,
    ) -> std::result::Result<(Attributes, Committed), Failure> {
        *attempts = self.destroy_object(&stored.provider_id).await?;
        self.store
            .commit_destroy(&self.op.id, self.expected_version)
            .await?;
        Ok((Attributes::new(), Committed::Removed))
    }

    async fn destroy_deposed(
        &self,
        stored: StateEntry,
        provider_id: &str,
        attempts: &mut u32,
    ) -> std::result::Result<(Attributes, Committed), Failure> {
        *attempts = self.destroy_object(provider_id).await?;

        let mut entry = stored;
        entry.deposed.retain(|d| d.provider_id != provider_id);
        let committed = self
            .store
            .commit_apply(&self.op.id, entry, self.expected_version)
            .await?;
        Ok((Attributes::new(), Committed::Entry(committed)))
    }

    /// Destroys a remote object, treating "already gone" as success.
    async fn destroy_object(&self, provider_id: &str) -> std::result::Result<u32, Failure> {
        let (result, made) = self
            .retry
            .run(&self.schema, &self.cancel, |attempt| {
                let ctx = self.context(attempt);
                async move {
                    match self.provider.destroy(&ctx, provider_id).await {
                        Err(ProviderError::NotFound { .. }) => {
                            info!("{provider_id} was already gone");
                            Ok(())
                        }
                        other => other,
                    }
                }
            })
            .await;
        result?;
        Ok(made)
    }
}

fn required(stored: Option<StateEntry>, id: &ResourceId) -> std::result::Result<StateEntry, Failure> {
    stored.ok_or_else(|| Failure::message(format!("no state entry for {id}")))
}

impl ExecutionReport {
    /// Tallies a list of results.
    #[must_use]
    pub fn from_results(results: Vec<OperationResult>) -> Self {
        let count = |pred: fn(&OperationOutcome) -> bool| results.iter().filter(|r| pred(&r.outcome)).count();

        let succeeded = count(|o| matches!(o, OperationOutcome::Succeeded { .. }));
        let unchanged = count(|o| matches!(o, OperationOutcome::Unchanged));
        let failed = count(|o| matches!(o, OperationOutcome::Failed { .. }));
        let skipped = count(|o| matches!(o, OperationOutcome::SkippedDependencyFailed { .. }));
        let cancelled = count(|o| matches!(o, OperationOutcome::Cancelled));
        let version_conflicts = results.iter().filter(|r| r.version_conflict).count();

        Self {
            success: failed + skipped + cancelled == 0,
            results,
            succeeded,
            unchanged,
            failed,
            skipped,
            cancelled,
            version_conflicts,
        }
    }

    /// Returns true if every operation succeeded or was unchanged.
    #[must_use]
    pub const fn all_successful(&self) -> bool {
        self.success
    }

    /// Resources changed by successful operations, deduplicated.
    #[must_use]
    pub fn changed_resources(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, OperationOutcome::Succeeded { .. }))
            .map(|r| r.id.to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// First failure message, if any.
    #[must_use]
    pub fn first_error(&self) -> Option<&str> {
        self.results.iter().find_map(|r| match &r.outcome {
            OperationOutcome::Failed { error } => Some(error.as_str()),
            _ => None,
        })
    }
}

impl std::fmt::Display for OperationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded { .. } => write!(f, "succeeded"),
            Self::Unchanged => write!(f, "unchanged"),
            Self::Failed { error } => write!(f, "failed: {error}"),
            Self::SkippedDependencyFailed { dependency } => {
                write!(f, "skipped ({dependency} did not succeed)")
            }
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Executed {} operations: {} succeeded, {} unchanged, {} failed, {} skipped, {} cancelled",
            self.results.len(),
            self.succeeded,
            self.unchanged,
            self.failed,
            self.skipped,
            self.cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_document;
    use crate::graph::GraphBuilder;
    use crate::planner::{DiffEngine, PlanMode, PlanScheduler};
    use crate::provider::{LocalProvider, MockResourceProvider, ProviderResponse};
    use crate::state::MemoryStateStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    const CHAIN: &str = r#"
  - { type: node, name: a, attributes: { size: 1 } }
  - { type: node, name: b, attributes: { upstream: "${node.a.id}" } }
"#;

    fn node_schema() -> ResourceSchema {
        ResourceSchema::new("node")
            .attribute("size")
            .attribute("upstream")
            .output("arn")
            .retry_on("Busy")
    }

    fn registry_with(provider: Arc<dyn ResourceProvider>) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry.register(provider).expect("registers");
        registry
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    fn plan_for(
        registry: &ProviderRegistry,
        resources: &str,
        snapshot: &StateSnapshot,
    ) -> (ResourceGraph, ExecutionPlan) {
        let document = parse_document(&format!("project: {{ name: test }}\nresources:\n{resources}"))
            .expect("document parses");
        let graph = GraphBuilder::new(registry).build(&document).expect("graph builds");
        let ops = DiffEngine::new(registry).diff(&graph, snapshot).expect("diffs");
        let plan = PlanScheduler::new(Some(&graph), snapshot)
            .schedule(ops, PlanMode::Apply, "hash")
            .expect("schedules");
        (graph, plan)
    }

    #[tokio::test]
    async fn test_apply_resolves_outputs_into_consumers() {
        let registry = registry_with(Arc::new(LocalProvider::new([node_schema()])));
        let store = Arc::new(MemoryStateStore::new());
        let snapshot = StateSnapshot::new();
        let (graph, plan) = plan_for(&registry, CHAIN, &snapshot);

        let report = PlanExecutor::new(registry, store.clone())
            .execute(&plan, Some(&graph), &snapshot)
            .await
            .expect("executes");

        assert!(report.success, "{report}");
        assert_eq!(report.succeeded, 2);

        let a = store.get(&ResourceId::new("node", "a")).await.expect("a recorded");
        let b = store.get(&ResourceId::new("node", "b")).await.expect("b recorded");
        assert_eq!(b.attributes.get("upstream"), Some(&json!(a.provider_id)));
        assert_eq!(b.dependencies, BTreeSet::from([ResourceId::new("node", "a")]));
        assert!(a.outputs.contains_key("arn"));
    }

    #[tokio::test]
    async fn test_retryable_create_retried_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let mut provider = MockResourceProvider::new();
        provider.expect_schemas().return_const(vec![node_schema()]);
        provider.expect_create().returning(move |ctx, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            if ctx.attempt < 3 {
                Err(ProviderError::api("Busy", "try later"))
            } else {
                Ok(ProviderResponse {
                    id: String::from("node-1"),
                    outputs: Attributes::new(),
                })
            }
        });

        let registry = registry_with(Arc::new(provider));
        let snapshot = StateSnapshot::new();
        let (graph, plan) = plan_for(
            &registry,
            "  - { type: node, name: a, attributes: { size: 1 } }\n",
            &snapshot,
        );

        let report = PlanExecutor::new(registry, Arc::new(MemoryStateStore::new()))
            .with_retry(fast_retry())
            .execute(&plan, Some(&graph), &snapshot)
            .await
            .expect("executes");

        assert!(report.success);
        assert_eq!(report.results[0].attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failure_skips_dependents() {
        let mut provider = MockResourceProvider::new();
        provider.expect_schemas().return_const(vec![node_schema()]);
        provider
            .expect_create()
            .times(1)
            .returning(|_, _| Err(ProviderError::api("Invalid", "size out of range")));

        let registry = registry_with(Arc::new(provider));
        let store = Arc::new(MemoryStateStore::new());
        let snapshot = StateSnapshot::new();
        let (graph, plan) = plan_for(&registry, CHAIN, &snapshot);

        let report = PlanExecutor::new(registry, store.clone())
            .with_retry(fast_retry())
            .execute(&plan, Some(&graph), &snapshot)
            .await
            .expect("executes");

        assert!(!report.success);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(
            report.results[1].outcome,
            OperationOutcome::SkippedDependencyFailed {
                dependency: String::from("node.a")
            }
        );
        assert!(store.load().await.expect("loads").is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_calls_nothing() {
        let mut provider = MockResourceProvider::new();
        provider.expect_schemas().return_const(vec![node_schema()]);
        provider.expect_create().never();

        let registry = registry_with(Arc::new(provider));
        let snapshot = StateSnapshot::new();
        let (graph, plan) = plan_for(&registry, CHAIN, &snapshot);
        let cancel = CancelSignal::new();
        cancel.cancel();

        let report = PlanExecutor::new(registry, Arc::new(MemoryStateStore::new()))
            .with_cancel(cancel)
            .execute(&plan, Some(&graph), &snapshot)
            .await
            .expect("executes");

        assert_eq!(report.cancelled, 2);
        assert!(report.results.iter().all(|r| r.outcome == OperationOutcome::Cancelled));
    }

    #[tokio::test]
    async fn test_stale_version_is_reported_without_provider_call() {
        let mut provider = MockResourceProvider::new();
        provider.expect_schemas().return_const(vec![node_schema()]);
        provider.expect_create().never();

        let registry = registry_with(Arc::new(provider));
        let snapshot = StateSnapshot::new();
        let (graph, plan) = plan_for(
            &registry,
            "  - { type: node, name: a, attributes: { size: 1 } }\n",
            &snapshot,
        );

        // Another writer records the resource after planning.
        let store = Arc::new(MemoryStateStore::new());
        let id = ResourceId::new("node", "a");
        store
            .commit_apply(&id, StateEntry::new(id.clone(), "node-other"), 0)
            .await
            .expect("commits");

        let report = PlanExecutor::new(registry, store.clone())
            .execute(&plan, Some(&graph), &snapshot)
            .await
            .expect("executes");

        assert_eq!(report.failed, 1);
        assert_eq!(report.version_conflicts, 1);
        assert_eq!(store.get(&id).await.expect("kept").provider_id, "node-other");
    }

    #[tokio::test]
    async fn test_destroy_of_missing_object_succeeds() {
        let mut provider = MockResourceProvider::new();
        provider.expect_schemas().return_const(vec![node_schema()]);
        provider.expect_destroy().times(1).returning(|_, provider_id| {
            Err(ProviderError::NotFound {
                provider_id: provider_id.to_string(),
            })
        });

        let registry = registry_with(Arc::new(provider));
        let id = ResourceId::new("node", "a");
        let store = Arc::new(MemoryStateStore::new());
        store
            .commit_apply(&id, StateEntry::new(id.clone(), "node-1"), 0)
            .await
            .expect("commits");
        let snapshot = store.load().await.expect("loads");

        let ops = DiffEngine::new(&registry)
            .diff_destroy(&snapshot, None)
            .expect("diffs");
        let plan = PlanScheduler::new(None, &snapshot)
            .schedule(ops, PlanMode::Destroy, "hash")
            .expect("schedules");

        let report = PlanExecutor::new(registry, store.clone())
            .execute(&plan, None, &snapshot)
            .await
            .expect("executes");

        assert!(report.success);
        assert!(store.load().await.expect("loads").is_empty());
    }
}
