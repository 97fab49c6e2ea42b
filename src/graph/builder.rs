//! Builds a [`ResourceGraph`] from a desired-state document.

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::config::{DesiredDocument, ResourceDeclaration};
use crate::error::{ConfigError, Result};
use crate::provider::{AttributeRole, ProviderRegistry, ResourceSchema};

use super::dag::{Dependency, ResourceGraph};
use super::node::{Expression, ResourceId, ResourceNode};

/// Turns declarations into typed nodes and reference edges.
#[derive(Debug)]
pub struct GraphBuilder<'a> {
    registry: &'a ProviderRegistry,
}

/// Visit state for cycle detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

impl<'a> GraphBuilder<'a> {
    /// Creates a builder validating against the registry's schemas.
    #[must_use]
    pub const fn new(registry: &'a ProviderRegistry) -> Self {
        Self { registry }
    }

    /// Builds the graph.
    ///
    /// # Errors
    ///
    /// Returns an error for duplicate resources, unknown resource types,
    /// schema violations, malformed or unresolved references, and cycles.
    pub fn build(&self, document: &DesiredDocument) -> Result<ResourceGraph> {
        let mut nodes: BTreeMap<ResourceId, ResourceNode> = BTreeMap::new();

        for declaration in &document.resources {
            let node = self.parse_declaration(declaration)?;
            if nodes.contains_key(&node.id) {
                return Err(ConfigError::DuplicateResource {
                    id: node.id.to_string(),
                }
                .into());
            }
            nodes.insert(node.id.clone(), node);
        }

        let edges = self.resolve_edges(&nodes)?;
        detect_cycle(&nodes, &edges)?;

        debug!(
            "Built resource graph with {} node(s) and {} edge(s)",
            nodes.len(),
            edges.len()
        );
        Ok(ResourceGraph::from_parts(nodes.into_values().collect(), edges))
    }

    fn parse_declaration(&self, declaration: &ResourceDeclaration) -> Result<ResourceNode> {
        let id = ResourceId::new(&declaration.resource_type, &declaration.name);
        let schema = self
            .registry
            .schema(&declaration.resource_type)
            .ok_or_else(|| ConfigError::UnknownResourceType {
                resource_type: declaration.resource_type.clone(),
            })?;

        check_attributes(&id, declaration, schema)?;

        let mut attributes = BTreeMap::new();
        for (name, value) in &declaration.attributes {
            let expression = Expression::parse(value).map_err(|message| ConfigError::ParseError {
                message,
                location: Some(format!("{id}.{name}")),
            })?;
            attributes.insert(name.clone(), expression);
        }

        let depends_on = declaration
            .depends_on
            .iter()
            .map(|raw| {
                raw.parse::<ResourceId>()
                    .map_err(|reason| ConfigError::UnresolvedReference {
                        consumer: id.to_string(),
                        reference: raw.clone(),
                        reason,
                    })
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(ResourceNode {
            id,
            attributes,
            depends_on,
            lifecycle: declaration.lifecycle,
        })
    }

    fn resolve_edges(
        &self,
        nodes: &BTreeMap<ResourceId, ResourceNode>,
    ) -> Result<Vec<(ResourceId, ResourceId, Dependency)>> {
        let mut edges = Vec::new();

        for node in nodes.values() {
            for (path, reference) in node.references() {
                let unresolved = |reason: String| ConfigError::UnresolvedReference {
                    consumer: node.id.to_string(),
                    reference: reference.to_string(),
                    reason,
                };

                if !nodes.contains_key(&reference.producer) {
                    return Err(unresolved(format!("{} is not declared", reference.producer)).into());
                }
                let exposed = self
                    .registry
                    .schema(&reference.producer.resource_type)
                    .is_some_and(|schema| schema.exposes(&reference.attribute));
                if !exposed {
                    return Err(unresolved(format!(
                        "type '{}' has no attribute '{}'",
                        reference.producer.resource_type, reference.attribute
                    ))
                    .into());
                }

                edges.push((
                    reference.producer.clone(),
                    node.id.clone(),
                    Dependency::Reference {
                        path,
                        attribute: reference.attribute.clone(),
                    },
                ));
            }

            for dependency in &node.depends_on {
                if !nodes.contains_key(dependency) {
                    return Err(ConfigError::UnresolvedReference {
                        consumer: node.id.to_string(),
                        reference: dependency.to_string(),
                        reason: format!("{dependency} is not declared"),
                    }
                    .into());
                }
                edges.push((dependency.clone(), node.id.clone(), Dependency::Explicit));
            }
        }

        Ok(edges)
    }
}

/// Rejects attributes the schema does not accept.
fn check_attributes(
    id: &ResourceId,
    declaration: &ResourceDeclaration,
    schema: &ResourceSchema,
) -> Result<()> {
    for name in declaration.attributes.keys() {
        match schema.role_of(name) {
            AttributeRole::Input => {}
            AttributeRole::Output => {
                return Err(ConfigError::validation(
                    format!("'{name}' is an output of type '{}' and cannot be set", schema.resource_type),
                    format!("{id}.{name}"),
                )
                .into());
            }
            AttributeRole::Unknown => {
                return Err(ConfigError::validation(
                    format!("type '{}' has no attribute '{name}'", schema.resource_type),
                    format!("{id}.{name}"),
                )
                .into());
            }
        }
    }

    if let Some(missing) = schema
        .required_attributes()
        .find(|name| !declaration.attributes.contains_key(*name))
    {
        return Err(ConfigError::validation(
            format!("required attribute '{missing}' is missing"),
            format!("{id}.{missing}"),
        )
        .into());
    }

    Ok(())
}

/// Depth-first search over producer → consumer edges. The first back edge
/// found yields the cycle, listed from its entry point back to itself.
fn detect_cycle(
    nodes: &BTreeMap<ResourceId, ResourceNode>,
    edges: &[(ResourceId, ResourceId, Dependency)],
) -> Result<()> {
    let mut adjacency: BTreeMap<&ResourceId, BTreeSet<&ResourceId>> = BTreeMap::new();
    for (producer, consumer, _) in edges {
        adjacency.entry(producer).or_default().insert(consumer);
    }

    let mut marks: BTreeMap<&ResourceId, Mark> = BTreeMap::new();
    let mut path: Vec<&ResourceId> = Vec::new();

    for start in nodes.keys() {
        if marks.contains_key(start) {
            continue;
        }
        if let Some(cycle) = visit(start, &adjacency, &mut marks, &mut path) {
            return Err(ConfigError::CyclicDependency { cycle }.into());
        }
    }
    Ok(())
}

fn visit<'a>(
    id: &'a ResourceId,
    adjacency: &BTreeMap<&'a ResourceId, BTreeSet<&'a ResourceId>>,
    marks: &mut BTreeMap<&'a ResourceId, Mark>,
    path: &mut Vec<&'a ResourceId>,
) -> Option<Vec<String>> {
    marks.insert(id, Mark::InProgress);
    path.push(id);

    for &next in adjacency.get(id).into_iter().flatten() {
        match marks.get(next) {
            Some(Mark::Done) => {}
            Some(Mark::InProgress) => {
                let start = path.iter().position(|p| *p == next).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(ToString::to_string).collect();
                cycle.push(next.to_string());
                return Some(cycle);
            }
            None => {
                if let Some(cycle) = visit(next, adjacency, marks, path) {
                    return Some(cycle);
                }
            }
        }
    }

    path.pop();
    marks.insert(id, Mark::Done);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_document;
    use crate::error::StratumError;
    use crate::provider::LocalProvider;
    use std::sync::Arc;

    fn registry() -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry
            .register(Arc::new(LocalProvider::new([
                ResourceSchema::new("network").immutable("cidr_block").output("arn"),
                ResourceSchema::new("subnet").required("network_id").attribute("tags"),
                ResourceSchema::new("server").attribute("subnet_ids").attribute("peer"),
            ])))
            .expect("registers");
        registry
    }

    fn build(resources: &str) -> Result<ResourceGraph> {
        let document = parse_document(&format!("project: {{ name: test }}\nresources:\n{resources}"))
            .expect("document parses");
        GraphBuilder::new(&registry()).build(&document)
    }

    #[test]
    fn test_edges_match_references() {
        let graph = build(
            r#"
  - { type: network, name: main, attributes: { cidr_block: 10.0.0.0/16 } }
  - { type: subnet, name: a, attributes: { network_id: "${network.main.id}" } }
  - { type: subnet, name: b, attributes: { network_id: "${network.main.arn}" } }
  - type: server
    name: web
    attributes: { subnet_ids: ["${subnet.a.id}", "${subnet.b.id}"] }
    depends_on: [network.main]
"#,
        )
        .expect("graph builds");

        let mut edges: Vec<String> = graph
            .edges()
            .map(|(from, to, dep)| format!("{from} -> {to} [{dep}]"))
            .collect();
        edges.sort();
        assert_eq!(
            edges,
            vec![
                "network.main -> server.web [depends_on]",
                "network.main -> subnet.a [network_id = id]",
                "network.main -> subnet.b [network_id = arn]",
                "subnet.a -> server.web [subnet_ids[0] = id]",
                "subnet.b -> server.web [subnet_ids[1] = id]",
            ]
        );

        let order = graph.topological_order();
        let position = |id: &str| order.iter().position(|o| o.to_string() == id);
        assert!(position("network.main") < position("subnet.a"));
        assert!(position("subnet.b") < position("server.web"));
    }

    #[test]
    fn test_cycle_lists_members() {
        let err = build(
            r#"
  - { type: server, name: a, attributes: { peer: "${server.b.id}" } }
  - { type: server, name: b, attributes: { peer: "${server.a.id}" } }
"#,
        )
        .expect_err("cycle");

        match err {
            StratumError::Config(ConfigError::CyclicDependency { cycle }) => {
                assert_eq!(cycle, vec!["server.a", "server.b", "server.a"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_reference_is_cycle() {
        let err = build(r#"  - { type: server, name: a, attributes: { peer: "${server.a.id}" } }"#)
            .expect_err("cycle");
        assert!(matches!(
            err,
            StratumError::Config(ConfigError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn test_duplicate_resource() {
        let err = build(
            r"
  - { type: network, name: main }
  - { type: network, name: main }
",
        )
        .expect_err("duplicate");
        assert!(matches!(
            err,
            StratumError::Config(ConfigError::DuplicateResource { ref id }) if id == "network.main"
        ));
    }

    #[test]
    fn test_unresolved_references() {
        let missing = build(r#"  - { type: subnet, name: a, attributes: { network_id: "${network.nope.id}" } }"#)
            .expect_err("undeclared producer");
        assert!(matches!(
            missing,
            StratumError::Config(ConfigError::UnresolvedReference { .. })
        ));

        let bad_attr = build(
            r#"
  - { type: network, name: main }
  - { type: subnet, name: a, attributes: { network_id: "${network.main.owner}" } }
"#,
        )
        .expect_err("unknown attribute");
        assert!(matches!(
            bad_attr,
            StratumError::Config(ConfigError::UnresolvedReference { .. })
        ));

        let bad_depends = build("  - { type: network, name: main, depends_on: [subnet.x] }")
            .expect_err("undeclared dependency");
        assert!(matches!(
            bad_depends,
            StratumError::Config(ConfigError::UnresolvedReference { .. })
        ));
    }

    #[test]
    fn test_schema_violations() {
        let output_set = build("  - { type: network, name: main, attributes: { arn: x } }");
        assert!(matches!(
            output_set,
            Err(StratumError::Config(ConfigError::ValidationError { .. }))
        ));

        let required = build("  - { type: subnet, name: a }");
        assert!(matches!(
            required,
            Err(StratumError::Config(ConfigError::ValidationError { .. }))
        ));

        let unknown_type = build("  - { type: queue, name: q }");
        assert!(matches!(
            unknown_type,
            Err(StratumError::Config(ConfigError::UnknownResourceType { .. }))
        ));
    }

    #[test]
    fn test_interpolation_is_parse_error() {
        let err = build(r#"  - { type: server, name: a, attributes: { peer: "host-${server.b.id}" } }"#)
            .expect_err("interpolation");
        assert!(matches!(
            err,
            StratumError::Config(ConfigError::ParseError { .. })
        ));
    }
}
