//! Diff engine comparing the desired graph with recorded state.
//!
//! Change detection is attribute by attribute: every declared attribute is
//! resolved against stored outputs and compared with the last applied value.
//! The engine emits unscheduled operations; ordering is the scheduler's job.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::error::{ConfigError, PlanError, Result};
use crate::graph::{Reference, ResourceGraph, ResourceId, ResourceNode};
use crate::provider::{ProviderRegistry, ResourceSchema};
use crate::state::{StateEntry, StateSnapshot};

use super::plan::{Action, AttributeChange, ChangeReason, DestroyTarget, PlanOperation, PlannedValue};

/// Computes the operations needed to converge state to the desired graph.
#[derive(Debug, Clone, Copy)]
pub struct DiffEngine<'a> {
    registry: &'a ProviderRegistry,
}

impl<'a> DiffEngine<'a> {
    /// Creates a diff engine reading schemas from `registry`.
    #[must_use]
    pub const fn new(registry: &'a ProviderRegistry) -> Self {
        Self { registry }
    }

    /// Diffs the desired graph against a snapshot.
    ///
    /// Operations come out in topological order of the graph, followed by
    /// destroys of resources no longer declared.
    ///
    /// # Errors
    ///
    /// Returns `PreventDestroy` if a protected resource would be replaced,
    /// or an error if a node's type has no schema.
    pub fn diff(&self, graph: &ResourceGraph, snapshot: &StateSnapshot) -> Result<Vec<PlanOperation>> {
        let mut operations = Vec::new();
        // Producers this plan changes, and what consumers will see of them.
        let mut pending: BTreeMap<ResourceId, Pending> = BTreeMap::new();

        for id in graph.topological_order() {
            let Some(node) = graph.node(&id) else {
                continue;
            };
            let schema = self.schema_for(&id)?;

            let Some(entry) = snapshot.entry(&id) else {
                debug!("{id} is not in state, planning create");
                let changes = node
                    .attributes
                    .iter()
                    .map(|(name, expr)| AttributeChange {
                        name: name.clone(),
                        before: None,
                        after: planned(expr.resolve(&|r: &Reference| lookup(snapshot, &pending, r))),
                        forces_replacement: false,
                    })
                    .collect();
                operations.push(PlanOperation::new(id.clone(), Action::Create, ChangeReason::New, 0).with_changes(changes));
                pending.insert(id, Pending::Unknown);
                continue;
            };

            operations.extend(deposed_cleanups(entry));

            let changes = attribute_changes(node, entry, schema, snapshot, &pending);
            if changes.is_empty() {
                operations.push(PlanOperation::new(
                    id,
                    Action::NoOp,
                    ChangeReason::Unchanged,
                    entry.version,
                ));
            } else if changes.iter().any(|c| c.forces_replacement) {
                if node.lifecycle.prevent_destroy {
                    return Err(PlanError::PreventDestroy { id: id.to_string() }.into());
                }
                debug!("{id} has immutable changes, planning replacement");
                operations.extend(replacement(entry, node, changes));
                pending.insert(id, Pending::Unknown);
            } else {
                pending.insert(id.clone(), Pending::updated(&changes, schema));
                operations.push(
                    PlanOperation::new(id, Action::Update, ChangeReason::Changed, entry.version)
                        .with_changes(changes),
                );
            }
        }

        for entry in snapshot.entries().filter(|e| !graph.contains(&e.id)) {
            debug!("{} is no longer declared, planning destroy", entry.id);
            operations.extend(deposed_cleanups(entry));
            operations.push(PlanOperation::destroy(
                entry.id.clone(),
                ChangeReason::Removed,
                entry.version,
                DestroyTarget::Current,
            ));
        }

        Ok(operations)
    }

    /// Plans the destruction of everything recorded in state.
    ///
    /// When the desired graph is available, protected resources in it abort
    /// the plan.
    ///
    /// # Errors
    ///
    /// Returns `PreventDestroy` if a protected resource is recorded.
    pub fn diff_destroy(
        &self,
        snapshot: &StateSnapshot,
        graph: Option<&ResourceGraph>,
    ) -> Result<Vec<PlanOperation>> {
        let mut operations = Vec::new();

        for entry in snapshot.entries() {
            if graph
                .and_then(|g| g.node(&entry.id))
                .is_some_and(|node| node.lifecycle.prevent_destroy)
            {
                return Err(PlanError::PreventDestroy {
                    id: entry.id.to_string(),
                }
                .into());
            }

            operations.extend(deposed_cleanups(entry));
            operations.push(PlanOperation::destroy(
                entry.id.clone(),
                ChangeReason::Removed,
                entry.version,
                DestroyTarget::Current,
            ));
        }

        Ok(operations)
    }

    fn schema_for(&self, id: &ResourceId) -> Result<&'a ResourceSchema> {
        self.registry.schema(&id.resource_type).ok_or_else(|| {
            ConfigError::UnknownResourceType {
                resource_type: id.resource_type.clone(),
            }
            .into()
        })
    }
}

/// What consumers can know about a producer this plan changes.
enum Pending {
    /// Created or replaced: nothing but the declaration is known.
    Unknown,
    /// Updated in place.
    Updated {
        /// Planned values of the changed inputs.
        changes: BTreeMap<String, PlannedValue>,
        /// Output-only attributes the provider may rewrite.
        outputs: BTreeSet<String>,
    },
}

impl Pending {
    fn updated(changes: &[AttributeChange], schema: &ResourceSchema) -> Self {
        Self::Updated {
            changes: changes
                .iter()
                .map(|c| (c.name.clone(), c.after.clone()))
                .collect(),
            // The provider id survives an update.
            outputs: schema.outputs.iter().filter(|o| *o != "id").cloned().collect(),
        }
    }
}

/// Resolves a reference during planning.
///
/// Producers pending creation or replacement are unknown. For an updated
/// producer, changed inputs take their planned value and outputs are
/// unknown. Anything else comes from state, a missing attribute resolving
/// to `null` to match what the executor records.
fn lookup(
    snapshot: &StateSnapshot,
    pending: &BTreeMap<ResourceId, Pending>,
    reference: &Reference,
) -> Option<Value> {
    match pending.get(&reference.producer) {
        Some(Pending::Unknown) => return None,
        Some(Pending::Updated { changes, outputs }) => {
            if let Some(after) = changes.get(&reference.attribute) {
                return match after {
                    PlannedValue::Known(value) => Some(value.clone()),
                    PlannedValue::Unknown => None,
                };
            }
            if outputs.contains(&reference.attribute) {
                return None;
            }
        }
        None => {}
    }
    snapshot
        .entry(&reference.producer)
        .map(|entry| entry.attribute(&reference.attribute).unwrap_or(Value::Null))
}

fn planned(value: Option<Value>) -> PlannedValue {
    value.map_or(PlannedValue::Unknown, PlannedValue::Known)
}

fn attribute_changes(
    node: &ResourceNode,
    entry: &StateEntry,
    schema: &ResourceSchema,
    snapshot: &StateSnapshot,
    pending: &BTreeMap<ResourceId, Pending>,
) -> Vec<AttributeChange> {
    let mut changes = Vec::new();

    for (name, expr) in &node.attributes {
        let before = entry.attributes.get(name).cloned();
        let after = expr.resolve(&|r: &Reference| lookup(snapshot, pending, r));
        if after.is_some() && after == before {
            continue;
        }
        changes.push(AttributeChange {
            name: name.clone(),
            before,
            after: planned(after),
            forces_replacement: schema.is_immutable(name),
        });
    }

    for (name, before) in &entry.attributes {
        if node.attributes.contains_key(name) {
            continue;
        }
        changes.push(AttributeChange {
            name: name.clone(),
            before: Some(before.clone()),
            after: PlannedValue::Known(Value::Null),
            forces_replacement: schema.is_immutable(name),
        });
    }

    changes
}

fn deposed_cleanups(entry: &StateEntry) -> impl Iterator<Item = PlanOperation> + '_ {
    entry.deposed.iter().map(|deposed| {
        PlanOperation::destroy(
            entry.id.clone(),
            ChangeReason::DeposedCleanup,
            entry.version,
            DestroyTarget::Deposed(deposed.provider_id.clone()),
        )
    })
}

/// Destroy and create halves of a replacement, in execution order.
fn replacement(entry: &StateEntry, node: &ResourceNode, changes: Vec<AttributeChange>) -> [PlanOperation; 2] {
    let id = entry.id.clone();
    if node.lifecycle.create_before_destroy {
        let mut create = PlanOperation::new(id.clone(), Action::Create, ChangeReason::Replace, entry.version)
            .with_changes(changes);
        create.create_before_destroy = true;
        [
            create,
            PlanOperation::destroy(
                id,
                ChangeReason::Replace,
                entry.version,
                DestroyTarget::Deposed(entry.provider_id.clone()),
            ),
        ]
    } else {
        [
            PlanOperation::destroy(id.clone(), ChangeReason::Replace, entry.version, DestroyTarget::Current),
            PlanOperation::new(id, Action::Create, ChangeReason::Replace, 0).with_changes(changes),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_document;
    use crate::graph::GraphBuilder;
    use crate::provider::{Attributes, LocalProvider};
    use crate::state::DeposedObject;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Arc;

    fn registry() -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry
            .register(Arc::new(LocalProvider::new([
                ResourceSchema::new("network")
                    .immutable("cidr_block")
                    .attribute("tags")
                    .output("arn"),
                ResourceSchema::new("subnet")
                    .required("network_id")
                    .attribute("tags"),
            ])))
            .expect("registers");
        registry
    }

    fn graph(registry: &ProviderRegistry, resources: &str) -> ResourceGraph {
        let document = parse_document(&format!("project: {{ name: test }}\nresources:\n{resources}"))
            .expect("document parses");
        GraphBuilder::new(registry).build(&document).expect("graph builds")
    }

    const NETWORK_AND_SUBNET: &str = r#"
  - { type: network, name: main, attributes: { cidr_block: 10.0.0.0/16 } }
  - { type: subnet, name: a, attributes: { network_id: "${network.main.id}" } }
"#;

    fn attrs(pairs: &[(&str, Value)]) -> Attributes {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    /// State as the executor would record it after applying NETWORK_AND_SUBNET.
    fn applied_snapshot() -> StateSnapshot {
        let mut snapshot = StateSnapshot::new();
        let network = ResourceId::new("network", "main");
        let subnet = ResourceId::new("subnet", "a");
        snapshot
            .commit_apply(
                &network,
                StateEntry::new(network.clone(), "net-1")
                    .with_attributes(attrs(&[("cidr_block", json!("10.0.0.0/16"))]))
                    .with_outputs(attrs(&[("arn", json!("arn:net-1"))])),
                0,
            )
            .expect("commits");
        snapshot
            .commit_apply(
                &subnet,
                StateEntry::new(subnet.clone(), "sub-1")
                    .with_attributes(attrs(&[("network_id", json!("net-1"))]))
                    .with_dependencies(BTreeSet::from([network])),
                0,
            )
            .expect("commits");
        snapshot
    }

    fn summary(operations: &[PlanOperation]) -> Vec<String> {
        operations.iter().map(|op| op.description()).collect()
    }

    #[test]
    fn test_empty_state_creates_everything() {
        let registry = registry();
        let graph = graph(&registry, NETWORK_AND_SUBNET);
        let ops = DiffEngine::new(&registry)
            .diff(&graph, &StateSnapshot::new())
            .expect("diffs");

        assert_eq!(summary(&ops), vec!["Create network.main", "Create subnet.a"]);
        let network_id = &ops[1].changes[0];
        assert_eq!(network_id.name, "network_id");
        assert_eq!(network_id.after, PlannedValue::Unknown);
    }

    #[test]
    fn test_applied_state_is_all_noop() {
        let registry = registry();
        let graph = graph(&registry, NETWORK_AND_SUBNET);
        let ops = DiffEngine::new(&registry)
            .diff(&graph, &applied_snapshot())
            .expect("diffs");

        assert!(ops.iter().all(|op| op.action == Action::NoOp));
        assert_eq!(ops.len(), 2);
    }

    #[test]
    fn test_mutable_change_and_removal_update() {
        let registry = registry();
        let graph = graph(
            &registry,
            r#"
  - { type: network, name: main, attributes: { cidr_block: 10.0.0.0/16, tags: { team: web } } }
  - { type: subnet, name: a, attributes: { network_id: "${network.main.id}" } }
"#,
        );
        let mut snapshot = applied_snapshot();
        let subnet = ResourceId::new("subnet", "a");
        let mut entry = snapshot.entry(&subnet).cloned().expect("present");
        entry.attributes.insert(String::from("tags"), json!({ "old": true }));
        snapshot.commit_apply(&subnet, entry, 2).expect("commits");

        let ops = DiffEngine::new(&registry).diff(&graph, &snapshot).expect("diffs");
        assert_eq!(summary(&ops), vec!["Update network.main", "Update subnet.a"]);
        assert_eq!(ops[0].changes[0].after, PlannedValue::Known(json!({ "team": "web" })));
        assert_eq!(ops[1].changes[0].name, "tags");
        assert_eq!(ops[1].changes[0].after, PlannedValue::Known(Value::Null));
        assert_eq!(ops[1].expected_version, 3);
    }

    #[test]
    fn test_immutable_change_replaces_destroy_first() {
        let registry = registry();
        let graph = graph(
            &registry,
            r#"
  - { type: network, name: main, attributes: { cidr_block: 10.1.0.0/16 } }
  - { type: subnet, name: a, attributes: { network_id: "${network.main.id}" } }
"#,
        );
        let ops = DiffEngine::new(&registry)
            .diff(&graph, &applied_snapshot())
            .expect("diffs");

        assert_eq!(
            summary(&ops),
            vec![
                "Destroy network.main",
                "Create replacement for network.main",
                "Update subnet.a",
            ]
        );
        assert!(ops[0].is_current_destroy());
        assert_eq!(ops[0].expected_version, 1);
        assert_eq!(ops[1].expected_version, 0);
        assert_eq!(ops[2].changes[0].after, PlannedValue::Unknown);
    }

    #[test]
    fn test_create_before_destroy_deposes_old_object() {
        let registry = registry();
        let graph = graph(
            &registry,
            r#"
  - type: network
    name: main
    attributes: { cidr_block: 10.1.0.0/16 }
    lifecycle: { create_before_destroy: true }
"#,
        );
        let mut snapshot = applied_snapshot();
        snapshot
            .commit_destroy(&ResourceId::new("subnet", "a"), 2)
            .expect("removes subnet");

        let ops = DiffEngine::new(&registry).diff(&graph, &snapshot).expect("diffs");
        assert_eq!(
            summary(&ops),
            vec![
                "Create replacement for network.main",
                "Destroy deposed object net-1 of network.main",
            ]
        );
        assert!(ops[0].create_before_destroy);
        assert_eq!(ops[0].expected_version, 1);
        assert_eq!(ops[1].reason, ChangeReason::Replace);
    }

    #[test]
    fn test_prevent_destroy_blocks_replacement() {
        let registry = registry();
        let graph = graph(
            &registry,
            r"
  - type: network
    name: main
    attributes: { cidr_block: 10.1.0.0/16 }
    lifecycle: { prevent_destroy: true }
",
        );
        let err = DiffEngine::new(&registry)
            .diff(&graph, &applied_snapshot())
            .expect_err("protected");
        assert!(matches!(
            err,
            crate::error::StratumError::Plan(PlanError::PreventDestroy { .. })
        ));
    }

    #[test]
    fn test_undeclared_entries_and_deposed_objects_destroyed() {
        let registry = registry();
        let graph = graph(
            &registry,
            "  - { type: network, name: main, attributes: { cidr_block: 10.0.0.0/16 } }\n",
        );
        let mut snapshot = applied_snapshot();
        let network = ResourceId::new("network", "main");
        let mut entry = snapshot.entry(&network).cloned().expect("present");
        entry.deposed.push(DeposedObject {
            provider_id: String::from("net-0"),
            deposed_at: Utc::now(),
        });
        snapshot.commit_apply(&network, entry, 1).expect("commits");

        let ops = DiffEngine::new(&registry).diff(&graph, &snapshot).expect("diffs");
        assert_eq!(
            summary(&ops),
            vec![
                "Destroy deposed object net-0 of network.main",
                "No change for network.main",
                "Destroy subnet.a",
            ]
        );
        assert_eq!(ops[0].reason, ChangeReason::DeposedCleanup);
        assert_eq!(ops[2].reason, ChangeReason::Removed);
    }

    #[test]
    fn test_destroy_mode_covers_state() {
        let registry = registry();
        let ops = DiffEngine::new(&registry)
            .diff_destroy(&applied_snapshot(), None)
            .expect("diffs");
        assert_eq!(summary(&ops), vec!["Destroy network.main", "Destroy subnet.a"]);

        let protected = graph(
            &registry,
            "  - { type: network, name: main, attributes: { cidr_block: 10.0.0.0/16 }, lifecycle: { prevent_destroy: true } }\n",
        );
        assert!(
            DiffEngine::new(&registry)
                .diff_destroy(&applied_snapshot(), Some(&protected))
                .is_err()
        );
    }

    #[test]
    fn test_updated_producer_values_flow_into_consumers() {
        let registry = registry();
        let graph = graph(
            &registry,
            r#"
  - { type: network, name: main, attributes: { cidr_block: 10.0.0.0/16, tags: { team: web } } }
  - { type: subnet, name: a, attributes: { network_id: "${network.main.id}", tags: "${network.main.tags}" } }
"#,
        );

        let ops = DiffEngine::new(&registry)
            .diff(&graph, &applied_snapshot())
            .expect("diffs");

        assert_eq!(summary(&ops), vec!["Update network.main", "Update subnet.a"]);
        assert_eq!(ops[1].changes.len(), 1);
        assert_eq!(ops[1].changes[0].after, PlannedValue::Known(json!({ "team": "web" })));
    }

    #[test]
    fn test_updated_producer_outputs_are_unknown() {
        let registry = registry();
        let graph = graph(
            &registry,
            r#"
  - { type: network, name: main, attributes: { cidr_block: 10.0.0.0/16, tags: { team: web } } }
  - { type: subnet, name: a, attributes: { network_id: "${network.main.id}", tags: "${network.main.arn}" } }
"#,
        );
        let mut snapshot = applied_snapshot();
        let subnet = ResourceId::new("subnet", "a");
        let mut entry = snapshot.entry(&subnet).cloned().expect("present");
        entry.attributes.insert(String::from("tags"), json!("arn:net-1"));
        snapshot.commit_apply(&subnet, entry, 2).expect("commits");

        let ops = DiffEngine::new(&registry).diff(&graph, &snapshot).expect("diffs");

        assert_eq!(summary(&ops), vec!["Update network.main", "Update subnet.a"]);
        assert_eq!(ops[1].changes[0].name, "tags");
        assert_eq!(ops[1].changes[0].after, PlannedValue::Unknown);
    }
}
