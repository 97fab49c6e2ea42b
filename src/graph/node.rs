//! Resource identities, nodes and attribute expressions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::config::LifecycleConfig;

/// Identity of a declared resource: its type and logical name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId {
    /// Resource type, served by one provider.
    pub resource_type: String,
    /// Logical name, unique within the type.
    pub name: String,
}

impl ResourceId {
    /// Creates an identifier.
    #[must_use]
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)
    }
}

impl FromStr for ResourceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((resource_type, name))
                if !resource_type.is_empty() && !name.is_empty() && !name.contains('.') =>
            {
                Ok(Self::new(resource_type, name))
            }
            _ => Err(format!("'{s}' is not of the form type.name")),
        }
    }
}

impl TryFrom<String> for ResourceId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.to_string()
    }
}

/// A reference to another resource's attribute.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Reference {
    /// Resource being referenced.
    pub producer: ResourceId,
    /// Attribute of the producer, input or output.
    pub attribute: String,
}

impl Reference {
    /// Parses a string attribute value.
    ///
    /// Returns `Ok(None)` for plain strings and `Ok(Some(_))` when the whole
    /// value is `${type.name.attribute}`.
    ///
    /// # Errors
    ///
    /// Returns a message when the string contains a malformed reference or
    /// embeds a reference inside a longer string.
    pub fn parse(value: &str) -> Result<Option<Self>, String> {
        if !value.contains("${") {
            return Ok(None);
        }

        let inner = value
            .strip_prefix("${")
            .and_then(|rest| rest.strip_suffix('}'))
            .filter(|inner| !inner.contains("${") && !inner.contains('}'))
            .ok_or_else(|| {
                format!("'{value}': references must be the entire value, interpolation is not supported")
            })?;

        let parts: Vec<&str> = inner.split('.').collect();
        match parts.as_slice() {
            [resource_type, name, attribute]
                if parts.iter().all(|p| !p.is_empty() && p.trim() == *p) =>
            {
                Ok(Some(Self {
                    producer: ResourceId::new(*resource_type, *name),
                    attribute: (*attribute).to_string(),
                }))
            }
            _ => Err(format!("'{value}': expected ${{type.name.attribute}}")),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}.{}}}", self.producer, self.attribute)
    }
}

/// A declared attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// A value containing no references.
    Literal(Value),
    /// A whole-value reference.
    Reference(Reference),
    /// A list with at least one reference inside.
    List(Vec<Expression>),
    /// A map with at least one reference inside.
    Map(BTreeMap<String, Expression>),
}

impl Expression {
    /// Parses a raw document value, recognising references at any depth.
    ///
    /// # Errors
    ///
    /// Returns a message for malformed references.
    pub fn parse(value: &Value) -> Result<Self, String> {
        let expression = match value {
            Value::String(s) => match Reference::parse(s)? {
                Some(reference) => Self::Reference(reference),
                None => Self::Literal(value.clone()),
            },
            Value::Array(items) => {
                let items = items.iter().map(Self::parse).collect::<Result<Vec<_>, _>>()?;
                if items.iter().all(|e| matches!(e, Self::Literal(_))) {
                    Self::Literal(value.clone())
                } else {
                    Self::List(items)
                }
            }
            Value::Object(map) => {
                let entries = map
                    .iter()
                    .map(|(k, v)| Self::parse(v).map(|e| (k.clone(), e)))
                    .collect::<Result<BTreeMap<_, _>, _>>()?;
                if entries.values().all(|e| matches!(e, Self::Literal(_))) {
                    Self::Literal(value.clone())
                } else {
                    Self::Map(entries)
                }
            }
            _ => Self::Literal(value.clone()),
        };
        Ok(expression)
    }

    /// Collects every reference together with its attribute path suffix.
    pub fn references(&self) -> Vec<(String, &Reference)> {
        let mut found = Vec::new();
        self.collect_references(String::new(), &mut found);
        found
    }

    fn collect_references<'a>(&'a self, path: String, found: &mut Vec<(String, &'a Reference)>) {
        match self {
            Self::Literal(_) => {}
            Self::Reference(reference) => found.push((path, reference)),
            Self::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    item.collect_references(format!("{path}[{i}]"), found);
                }
            }
            Self::Map(entries) => {
                for (key, item) in entries {
                    item.collect_references(format!("{path}.{key}"), found);
                }
            }
        }
    }

    /// Resolves the expression to a concrete value.
    ///
    /// Returns `None` if any reference is not yet known.
    pub fn resolve<F>(&self, lookup: &F) -> Option<Value>
    where
        F: Fn(&Reference) -> Option<Value>,
    {
        match self {
            Self::Literal(value) => Some(value.clone()),
            Self::Reference(reference) => lookup(reference),
            Self::List(items) => items
                .iter()
                .map(|item| item.resolve(lookup))
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            Self::Map(entries) => entries
                .iter()
                .map(|(k, v)| v.resolve(lookup).map(|v| (k.clone(), v)))
                .collect::<Option<serde_json::Map<_, _>>>()
                .map(Value::Object),
        }
    }
}

/// A resource in the desired graph. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceNode {
    /// Identity.
    pub id: ResourceId,
    /// Declared attributes.
    pub attributes: BTreeMap<String, Expression>,
    /// Explicit ordering dependencies.
    pub depends_on: Vec<ResourceId>,
    /// Lifecycle flags.
    pub lifecycle: LifecycleConfig,
}

impl ResourceNode {
    /// Every reference held by this node with the consumer attribute path.
    pub fn references(&self) -> Vec<(String, &Reference)> {
        self.attributes
            .iter()
            .flat_map(|(name, expr)| {
                expr.references()
                    .into_iter()
                    .map(move |(suffix, r)| (format!("{name}{suffix}"), r))
            })
            .collect()
    }
}

impl fmt::Display for ResourceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.id.fmt(f)
    }
}
