//! Resource type schemas.
//!
//! A schema tells the reconciler which attributes a resource type accepts,
//! which of them force replacement when changed, which attributes exist only
//! as provider outputs, and which provider error codes are worth retrying.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::ProviderError;

/// Schema for one resource type.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceSchema {
    /// Resource type name.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Input attributes.
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeSchema>,
    /// Output-only attributes assigned by the provider.
    #[serde(default)]
    pub outputs: BTreeSet<String>,
    /// Provider error codes that are safe to retry.
    #[serde(default)]
    pub retryable_errors: BTreeSet<String>,
}

/// Schema for one input attribute.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttributeSchema {
    /// The attribute must be declared.
    #[serde(default)]
    pub required: bool,
    /// Changing the attribute replaces the resource.
    #[serde(default)]
    pub immutable: bool,
}

/// How an attribute name relates to a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeRole {
    /// A declarable input attribute.
    Input,
    /// An output-only attribute.
    Output,
    /// Not part of the schema.
    Unknown,
}

impl ResourceSchema {
    /// Creates an empty schema for a type. Every schema exposes `id`.
    #[must_use]
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            outputs: BTreeSet::from([String::from("id")]),
            ..Self::default()
        }
    }

    /// Adds an optional, mutable input attribute.
    #[must_use]
    pub fn attribute(mut self, name: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), AttributeSchema::default());
        self
    }

    /// Adds a required input attribute.
    #[must_use]
    pub fn required(mut self, name: impl Into<String>) -> Self {
        self.attributes.insert(
            name.into(),
            AttributeSchema {
                required: true,
                immutable: false,
            },
        );
        self
    }

    /// Adds an input attribute that forces replacement when changed.
    #[must_use]
    pub fn immutable(mut self, name: impl Into<String>) -> Self {
        self.attributes.insert(
            name.into(),
            AttributeSchema {
                required: false,
                immutable: true,
            },
        );
        self
    }

    /// Adds an output-only attribute.
    #[must_use]
    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.outputs.insert(name.into());
        self
    }

    /// Marks a provider error code as retryable.
    #[must_use]
    pub fn retry_on(mut self, code: impl Into<String>) -> Self {
        self.retryable_errors.insert(code.into());
        self
    }

    /// Classifies an attribute name.
    #[must_use]
    pub fn role_of(&self, name: &str) -> AttributeRole {
        if self.attributes.contains_key(name) {
            AttributeRole::Input
        } else if name == "id" || self.outputs.contains(name) {
            AttributeRole::Output
        } else {
            AttributeRole::Unknown
        }
    }

    /// Returns true if other resources may reference this attribute.
    #[must_use]
    pub fn exposes(&self, name: &str) -> bool {
        self.role_of(name) != AttributeRole::Unknown
    }

    /// Returns true if changing the attribute forces replacement.
    #[must_use]
    pub fn is_immutable(&self, name: &str) -> bool {
        self.attributes.get(name).is_some_and(|a| a.immutable)
    }

    /// Names of required attributes.
    pub fn required_attributes(&self) -> impl Iterator<Item = &str> {
        self.attributes
            .iter()
            .filter(|(_, a)| a.required)
            .map(|(name, _)| name.as_str())
    }

    /// Decides whether an error from this resource type should be retried.
    #[must_use]
    pub fn is_retryable(&self, error: &ProviderError) -> bool {
        match error {
            ProviderError::Api { code, .. } => self.retryable_errors.contains(code),
            other => other.is_transient(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network_schema() -> ResourceSchema {
        ResourceSchema::new("network")
            .immutable("cidr_block")
            .attribute("tags")
            .output("arn")
            .retry_on("Throttling")
    }

    #[test]
    fn test_roles() {
        let schema = network_schema();
        assert_eq!(schema.role_of("cidr_block"), AttributeRole::Input);
        assert_eq!(schema.role_of("id"), AttributeRole::Output);
        assert_eq!(schema.role_of("arn"), AttributeRole::Output);
        assert_eq!(schema.role_of("nope"), AttributeRole::Unknown);
        assert!(schema.is_immutable("cidr_block"));
        assert!(!schema.is_immutable("tags"));
    }

    #[test]
    fn test_retry_classification() {
        let schema = network_schema();
        assert!(schema.is_retryable(&ProviderError::api("Throttling", "slow down")));
        assert!(!schema.is_retryable(&ProviderError::api("InvalidCidr", "bad")));
        assert!(schema.is_retryable(&ProviderError::network("reset")));
        assert!(!schema.is_retryable(&ProviderError::Authentication {
            message: String::from("denied"),
        }));
    }

    #[test]
    fn test_schema_from_yaml() {
        let yaml = r"
type: function
attributes:
  runtime: { required: true }
  role_arn: { immutable: true }
outputs: [arn, invoke_arn]
retryable_errors: [TooManyRequests]
";
        let schema: ResourceSchema = serde_yaml::from_str(yaml).expect("schema parses");
        assert_eq!(schema.resource_type, "function");
        assert_eq!(schema.required_attributes().collect::<Vec<_>>(), vec!["runtime"]);
        assert!(schema.is_immutable("role_arn"));
        assert!(schema.exposes("invoke_arn"));
        assert!(schema.exposes("id"));
    }
}
