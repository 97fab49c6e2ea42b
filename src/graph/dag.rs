//! The resolved resource graph.
//!
//! Edges run from producer to consumer: one edge per reference plus one per
//! explicit `depends_on` entry.

use petgraph::Direction;
use petgraph::dot::Dot;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::node::{ResourceId, ResourceNode};

/// Why one resource depends on another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dependency {
    /// The consumer attribute at `path` references `attribute` of the producer.
    Reference {
        /// Consumer attribute path.
        path: String,
        /// Producer attribute.
        attribute: String,
    },
    /// Declared through `depends_on`.
    Explicit,
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reference { path, attribute } => write!(f, "{path} = {attribute}"),
            Self::Explicit => write!(f, "depends_on"),
        }
    }
}

/// A validated, acyclic graph of desired resources.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    graph: DiGraph<ResourceNode, Dependency>,
    index: BTreeMap<ResourceId, NodeIndex>,
}

impl ResourceGraph {
    /// Assembles a graph. Callers guarantee that every edge endpoint is a
    /// node and that the edges are acyclic.
    pub(super) fn from_parts(
        nodes: Vec<ResourceNode>,
        edges: Vec<(ResourceId, ResourceId, Dependency)>,
    ) -> Self {
        let mut graph = DiGraph::new();
        let mut index = BTreeMap::new();

        for node in nodes {
            let id = node.id.clone();
            index.insert(id, graph.add_node(node));
        }
        for (producer, consumer, dependency) in edges {
            if let (Some(&from), Some(&to)) = (index.get(&producer), index.get(&consumer)) {
                graph.add_edge(from, to, dependency);
            }
        }

        Self { graph, index }
    }

    /// Number of resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns true if the graph holds no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Returns true if the resource is declared.
    #[must_use]
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.index.contains_key(id)
    }

    /// Looks up a node.
    #[must_use]
    pub fn node(&self, id: &ResourceId) -> Option<&ResourceNode> {
        self.index.get(id).map(|&idx| &self.graph[idx])
    }

    /// All nodes ordered by identifier.
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.index.values().map(|&idx| &self.graph[idx])
    }

    /// Direct producers of a resource.
    #[must_use]
    pub fn dependencies(&self, id: &ResourceId) -> BTreeSet<ResourceId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Direct consumers of a resource.
    #[must_use]
    pub fn dependents(&self, id: &ResourceId) -> BTreeSet<ResourceId> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &ResourceId, direction: Direction) -> BTreeSet<ResourceId> {
        let Some(&idx) = self.index.get(id) else {
            return BTreeSet::new();
        };
        self.graph
            .neighbors_directed(idx, direction)
            .map(|n| self.graph[n].id.clone())
            .collect()
    }

    /// Every edge as `(producer, consumer, dependency)`.
    pub fn edges(&self) -> impl Iterator<Item = (&ResourceId, &ResourceId, &Dependency)> {
        self.graph.edge_references().map(|e| {
            (
                &self.graph[e.source()].id,
                &self.graph[e.target()].id,
                e.weight(),
            )
        })
    }

    /// Resources with producers before consumers, ties broken by identifier.
    #[must_use]
    pub fn topological_order(&self) -> Vec<ResourceId> {
        let mut in_degree: BTreeMap<&ResourceId, usize> = self
            .index
            .iter()
            .map(|(id, &idx)| (id, self.dependency_count(idx)))
            .collect();
        let mut ready: BTreeSet<&ResourceId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.len());

        while let Some(id) = ready.pop_first() {
            order.push(id.clone());
            let idx = self.index[id];
            let consumers: BTreeSet<NodeIndex> =
                self.graph.neighbors_directed(idx, Direction::Outgoing).collect();
            for consumer in consumers {
                let consumer_id = &self.graph[consumer].id;
                if let Some(degree) = in_degree.get_mut(consumer_id) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        ready.insert(consumer_id);
                    }
                }
            }
        }

        order
    }

    /// Distinct producers of a node, counting parallel edges once.
    fn dependency_count(&self, idx: NodeIndex) -> usize {
        self.graph
            .neighbors_directed(idx, Direction::Incoming)
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Renders the graph in Graphviz DOT format.
    #[must_use]
    pub fn to_dot(&self) -> String {
        Dot::new(&self.graph).to_string()
    }
}
