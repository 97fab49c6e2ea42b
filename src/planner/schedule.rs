//! Orders plan operations into waves.
//!
//! Ordering constraints become edges of a petgraph graph over the operations
//! that change something. Waves are the Kahn levels of that graph, so every
//! operation in a wave depends only on operations in earlier waves.

use chrono::Utc;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::error::{PlanError, Result};
use crate::graph::{ResourceGraph, ResourceId};
use crate::state::StateSnapshot;

use super::plan::{Action, ChangeReason, ExecutionPlan, PlanMode, PlanOperation};

/// Schedules diff output into an [`ExecutionPlan`].
#[derive(Debug, Clone, Copy)]
pub struct PlanScheduler<'a> {
    graph: Option<&'a ResourceGraph>,
    snapshot: &'a StateSnapshot,
}

impl<'a> PlanScheduler<'a> {
    /// Creates a scheduler. The graph is absent for destroy runs planned
    /// without a document.
    #[must_use]
    pub const fn new(graph: Option<&'a ResourceGraph>, snapshot: &'a StateSnapshot) -> Self {
        Self { graph, snapshot }
    }

    /// Orders the operations into waves.
    ///
    /// # Errors
    ///
    /// Returns `CyclicPlan` if the ordering constraints contradict each other.
    pub fn schedule(
        &self,
        operations: Vec<PlanOperation>,
        mode: PlanMode,
        document_hash: &str,
    ) -> Result<ExecutionPlan> {
        let mut order: DiGraph<usize, ()> = DiGraph::new();
        let mut nodes: BTreeMap<usize, NodeIndex> = BTreeMap::new();
        let mut by_id: BTreeMap<&ResourceId, Vec<usize>> = BTreeMap::new();

        for (i, op) in operations.iter().enumerate() {
            if op.action == Action::NoOp {
                continue;
            }
            nodes.insert(i, order.add_node(i));
            by_id.entry(&op.id).or_default().push(i);
        }

        let mut edges: BTreeSet<(usize, usize)> = BTreeSet::new();
        let ops_of = |id: &ResourceId| by_id.get(id).map_or(&[][..], Vec::as_slice);
        let creates_or_updates = |id: &ResourceId| {
            ops_of(id)
                .iter()
                .copied()
                .filter(|&i| operations[i].is_create_or_update())
                .collect::<Vec<_>>()
        };
        let destroys = |id: &ResourceId| {
            ops_of(id)
                .iter()
                .copied()
                .filter(|&i| operations[i].action == Action::Destroy)
                .collect::<Vec<_>>()
        };

        // Producers are created or updated before their consumers.
        if let Some(graph) = self.graph {
            for (producer, consumer, _) in graph.edges() {
                for before in creates_or_updates(producer) {
                    for after in creates_or_updates(consumer) {
                        edges.insert((before, after));
                    }
                }
            }
        }

        for (i, op) in operations.iter().enumerate() {
            if op.action != Action::Destroy {
                continue;
            }
            let Some(entry) = self.snapshot.entry(&op.id) else {
                continue;
            };
            // Dependents are destroyed before what they depended on.
            for dependency in &entry.dependencies {
                for after in destroys(dependency) {
                    edges.insert((i, after));
                }
            }
        }

        for (i, op) in operations.iter().enumerate() {
            if !op.is_current_destroy() || op.reason != ChangeReason::Removed {
                continue;
            }
            // Surviving dependents stop referencing a removed resource first.
            for entry in self.snapshot.entries() {
                if entry.dependencies.contains(&op.id) {
                    for before in creates_or_updates(&entry.id) {
                        edges.insert((before, i));
                    }
                }
            }
        }

        if let Some(graph) = self.graph {
            for (i, op) in operations.iter().enumerate() {
                if !op.is_deposed_destroy() || op.reason != ChangeReason::Replace {
                    continue;
                }
                // Consumers move to the replacement before the old object goes.
                for consumer in graph.dependents(&op.id) {
                    for before in creates_or_updates(&consumer) {
                        edges.insert((before, i));
                    }
                }
            }
        }

        for chain in by_id.values() {
            for pair in chain.windows(2) {
                edges.insert((pair[0], pair[1]));
            }
        }

        let mut predecessors = vec![BTreeSet::new(); operations.len()];
        for &(before, after) in &edges {
            if let (Some(&from), Some(&to)) = (nodes.get(&before), nodes.get(&after)) {
                order.update_edge(from, to, ());
                predecessors[after].insert(before);
            }
        }

        let waves = kahn_levels(&order).map_err(|stuck| PlanError::CyclicPlan {
            operations: stuck
                .into_iter()
                .map(|i| operations[i].description())
                .collect(),
        })?;
        debug!(
            "Scheduled {} operation(s) into {} wave(s)",
            nodes.len(),
            waves.len()
        );

        Ok(ExecutionPlan {
            created_at: Utc::now(),
            document_hash: document_hash.to_string(),
            mode,
            operations,
            waves,
            predecessors,
        })
    }
}

/// Groups the graph's node weights into Kahn levels, each sorted.
///
/// On failure returns the weights that could not be levelled.
fn kahn_levels(graph: &DiGraph<usize, ()>) -> std::result::Result<Vec<Vec<usize>>, Vec<usize>> {
    let mut in_degree: BTreeMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|n| (n, graph.neighbors_directed(n, Direction::Incoming).count()))
        .collect();

    let mut current: Vec<NodeIndex> = in_degree
        .iter()
        .filter(|&(_, &d)| d == 0)
        .map(|(&n, _)| n)
        .collect();
    let mut levels = Vec::new();
    let mut placed = 0;

    while !current.is_empty() {
        let mut next = Vec::new();
        for &node in &current {
            for successor in graph.neighbors_directed(node, Direction::Outgoing) {
                if let Some(degree) = in_degree.get_mut(&successor) {
                    *degree -= 1;
                    if *degree == 0 {
                        next.push(successor);
                    }
                }
            }
        }

        placed += current.len();
        let mut level: Vec<usize> = current.iter().map(|&n| graph[n]).collect();
        level.sort_unstable();
        levels.push(level);
        current = next;
    }

    if placed == graph.node_count() {
        Ok(levels)
    } else {
        let mut stuck: Vec<usize> = in_degree
            .into_iter()
            .filter(|&(_, d)| d > 0)
            .map(|(n, _)| graph[n])
            .collect();
        stuck.sort_unstable();
        Err(stuck)
    }
}
