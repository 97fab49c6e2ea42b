//! The provider capability interface.
//!
//! Every remote resource lifecycle is reached through [`ResourceProvider`].
//! The reconciler never knows what a resource type means; it only knows the
//! schema and these three calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::cancel::CancelSignal;
use crate::error::ProviderError;
use crate::graph::ResourceId;

use super::schema::ResourceSchema;

/// Resolved attribute values keyed by attribute name.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Context passed to every provider call.
#[derive(Debug, Clone)]
pub struct OperationContext {
    /// Resource the call acts on.
    pub resource: ResourceId,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Run-wide cancellation signal. Providers decide whether an in-flight
    /// call finishes or aborts when it fires.
    pub cancel: CancelSignal,
}

/// Successful create or update response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Provider-assigned identifier.
    pub id: String,
    /// Output attribute values.
    #[serde(default)]
    pub outputs: Attributes,
}

/// Lifecycle operations for one or more resource types.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Schemas of the resource types this provider serves.
    fn schemas(&self) -> Vec<ResourceSchema>;

    /// Creates a remote object from fully resolved attributes.
    async fn create(
        &self,
        ctx: &OperationContext,
        attributes: &Attributes,
    ) -> Result<ProviderResponse, ProviderError>;

    /// Applies changed attributes to an existing object.
    async fn update(
        &self,
        ctx: &OperationContext,
        provider_id: &str,
        changes: &Attributes,
    ) -> Result<ProviderResponse, ProviderError>;

    /// Destroys a remote object.
    async fn destroy(&self, ctx: &OperationContext, provider_id: &str) -> Result<(), ProviderError>;
}

impl OperationContext {
    /// Creates a context for the first attempt.
    #[must_use]
    pub fn new(resource: ResourceId, cancel: CancelSignal) -> Self {
        Self {
            resource,
            attempt: 1,
            cancel,
        }
    }

    /// Returns the resource type of the target.
    #[must_use]
    pub fn resource_type(&self) -> &str {
        &self.resource.resource_type
    }
}

impl ProviderResponse {
    /// Returns the outputs with the provider id folded in as `id`.
    #[must_use]
    pub fn outputs_with_id(&self) -> Attributes {
        let mut outputs = self.outputs.clone();
        outputs.insert(String::from("id"), serde_json::Value::String(self.id.clone()));
        outputs
    }
}
