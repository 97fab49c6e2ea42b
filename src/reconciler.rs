//! Reconciler driving plan, apply and destroy runs.
//!
//! A run builds the resource graph, loads state, plans, and executes under
//! the state lock. When another writer moved state underneath the run, the
//! reconciler reloads and re-plans, up to a bounded number of attempts.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cancel::CancelSignal;
use crate::config::{DesiredDocument, DocumentHasher};
use crate::error::{ApplyError, Result};
use crate::graph::{GraphBuilder, ResourceGraph};
use crate::planner::{
    DiffEngine, ExecutionPlan, ExecutionReport, PlanExecutor, PlanMode, PlanScheduler, RetryPolicy,
};
use crate::provider::ProviderRegistry;
use crate::state::{HistoryEntry, HistoryOperation, StateSnapshot, StateStore, generate_holder_id};

/// Default number of plan attempts when state keeps changing.
pub const DEFAULT_MAX_PLAN_ATTEMPTS: u32 = 3;

/// Drives reconciliation runs for one document.
pub struct Reconciler<'a> {
    /// Desired-state document.
    document: &'a DesiredDocument,
    /// Providers for the document's resource types.
    registry: &'a ProviderRegistry,
    /// State store.
    store: Arc<dyn StateStore>,
    /// Document hasher.
    hasher: DocumentHasher,
    /// Run-wide cancellation.
    cancel: CancelSignal,
    /// Operations in flight per wave.
    parallelism: usize,
    /// Provider retry policy.
    retry: RetryPolicy,
    /// Maximum plan attempts after version conflicts.
    max_attempts: u32,
}

/// Result of an apply or destroy run.
#[derive(Debug, serde::Serialize)]
pub struct ReconciliationResult {
    /// Whether every operation succeeded.
    pub success: bool,
    /// Plan attempts made.
    pub attempts: u32,
    /// The plan executed by the final attempt.
    pub plan: ExecutionPlan,
    /// Execution report of the final attempt.
    pub report: ExecutionReport,
}

impl<'a> Reconciler<'a> {
    /// Creates a reconciler using the document's apply settings.
    #[must_use]
    pub fn new(
        document: &'a DesiredDocument,
        registry: &'a ProviderRegistry,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            document,
            registry,
            store,
            hasher: DocumentHasher::new(),
            cancel: CancelSignal::new(),
            parallelism: document.apply.parallelism,
            retry: RetryPolicy::from_settings(&document.apply),
            max_attempts: DEFAULT_MAX_PLAN_ATTEMPTS,
        }
    }

    /// Sets the maximum plan attempts.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Overrides the document's parallelism.
    #[must_use]
    pub const fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Overrides the document's retry settings.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the cancellation signal.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Builds and validates the resource graph.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid documents.
    pub fn build_graph(&self) -> Result<ResourceGraph> {
        GraphBuilder::new(self.registry).build(self.document)
    }

    /// Plans a run against the current state without changing anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph cannot be built, state cannot be
    /// loaded, or the plan cannot be ordered.
    pub async fn plan(&self, mode: PlanMode) -> Result<ExecutionPlan> {
        let graph = self.build_graph()?;
        let snapshot = self.store.load().await?;
        self.plan_against(mode, &graph, &snapshot)
    }

    fn plan_against(
        &self,
        mode: PlanMode,
        graph: &ResourceGraph,
        snapshot: &StateSnapshot,
    ) -> Result<ExecutionPlan> {
        let diff = DiffEngine::new(self.registry);
        let operations = match mode {
            PlanMode::Apply => diff.diff(graph, snapshot)?,
            PlanMode::Destroy => diff.diff_destroy(snapshot, Some(graph))?,
        };

        let hash = self.hasher.hash_document(self.document)?;
        let plan = PlanScheduler::new(Some(graph), snapshot).schedule(operations, mode, &hash)?;
        debug!("{plan}");
        Ok(plan)
    }

    /// Converges state to the document.
    ///
    /// # Errors
    ///
    /// Returns plan-time errors before any provider call, lock errors when
    /// another process holds the state, and `MaxAttemptsExceeded` when
    /// state kept changing underneath every attempt.
    pub async fn apply(&self) -> Result<ReconciliationResult> {
        self.run_locked(PlanMode::Apply).await
    }

    /// Destroys every recorded resource.
    ///
    /// # Errors
    ///
    /// Same as [`Reconciler::apply`].
    pub async fn destroy(&self) -> Result<ReconciliationResult> {
        self.run_locked(PlanMode::Destroy).await
    }

    async fn run_locked(&self, mode: PlanMode) -> Result<ReconciliationResult> {
        info!(
            "Starting {} for {}",
            history_operation(mode),
            self.document.qualified_name()
        );

        // Plan-time errors surface before the lock is taken.
        let graph = self.build_graph()?;

        let lock = self
            .store
            .acquire_lock(&generate_holder_id(), &history_operation(mode).to_string())
            .await?;
        let outcome = self.run(mode, &graph).await;

        if let Err(e) = self.store.release_lock(&lock.lock_id).await {
            warn!("Failed to release state lock {}: {e}", lock.lock_id);
        }
        outcome
    }

    async fn run(&self, mode: PlanMode, graph: &ResourceGraph) -> Result<ReconciliationResult> {
        let executor = PlanExecutor::new(self.registry.clone(), Arc::clone(&self.store))
            .with_retry(self.retry)
            .with_parallelism(self.parallelism)
            .with_cancel(self.cancel.clone());

        for attempt in 1..=self.max_attempts {
            debug!("Plan attempt {attempt}/{}", self.max_attempts);
            let snapshot = self.store.load().await?;
            let plan = self.plan_against(mode, graph, &snapshot)?;

            if plan.is_empty() {
                info!("No changes required - state is converged");
            }
            let report = executor.execute(&plan, Some(graph), &snapshot).await?;

            if report.version_conflicts > 0 && !self.cancel.is_cancelled() {
                if attempt < self.max_attempts {
                    warn!(
                        "{} operation(s) hit stale state, re-planning",
                        report.version_conflicts
                    );
                    continue;
                }
                self.record(mode, &plan, &report).await?;
                return Err(ApplyError::MaxAttemptsExceeded { attempts: attempt }.into());
            }

            if !plan.is_empty() {
                self.record(mode, &plan, &report).await?;
            }
            return Ok(ReconciliationResult {
                success: report.success,
                attempts: attempt,
                plan,
                report,
            });
        }

        Err(ApplyError::MaxAttemptsExceeded {
            attempts: self.max_attempts,
        }
        .into())
    }

    async fn record(&self, mode: PlanMode, plan: &ExecutionPlan, report: &ExecutionReport) -> Result<()> {
        let mut entry = HistoryEntry::new(
            history_operation(mode),
            &plan.document_hash,
            report.changed_resources(),
        );
        if !report.success {
            let message = report.first_error().map_or_else(
                || {
                    format!(
                        "{} operation(s) skipped, {} cancelled",
                        report.skipped, report.cancelled
                    )
                },
                str::to_string,
            );
            entry = entry.failed(message);
        }
        self.store.record_history(entry).await
    }
}

const fn history_operation(mode: PlanMode) -> HistoryOperation {
    match mode {
        PlanMode::Apply => HistoryOperation::Apply,
        PlanMode::Destroy => HistoryOperation::Destroy,
    }
}

impl std::fmt::Debug for Reconciler<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("project", &self.document.qualified_name())
            .field("backend", &self.store.backend_type())
            .field("parallelism", &self.parallelism)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Display for ReconciliationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = if self.success { "successful" } else { "failed" };
        writeln!(f, "Reconciliation {status}:")?;
        write!(f, "  {}", self.report)
    }
}
