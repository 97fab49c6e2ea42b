//! In-process provider.
//!
//! Assigns identifiers locally and derives every declared output from the
//! identifier, so documents can be planned and applied end to end without
//! any remote service.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

use crate::error::ProviderError;

use super::capability::{Attributes, OperationContext, ProviderResponse, ResourceProvider};
use super::schema::ResourceSchema;

/// Provider that fabricates remote objects in memory.
#[derive(Debug, Clone, Default)]
pub struct LocalProvider {
    schemas: BTreeMap<String, ResourceSchema>,
}

impl LocalProvider {
    /// Creates a local provider serving the given schemas.
    #[must_use]
    pub fn new(schemas: impl IntoIterator<Item = ResourceSchema>) -> Self {
        Self {
            schemas: schemas
                .into_iter()
                .map(|s| (s.resource_type.clone(), s))
                .collect(),
        }
    }

    fn schema(&self, resource_type: &str) -> Result<&ResourceSchema, ProviderError> {
        self.schemas
            .get(resource_type)
            .ok_or_else(|| ProviderError::UnknownResourceType {
                resource_type: resource_type.to_string(),
            })
    }

    fn outputs_for(schema: &ResourceSchema, provider_id: &str) -> Attributes {
        schema
            .outputs
            .iter()
            .filter(|name| name.as_str() != "id")
            .map(|name| {
                (
                    name.clone(),
                    serde_json::Value::String(format!(
                        "local:{}/{provider_id}/{name}",
                        schema.resource_type
                    )),
                )
            })
            .collect()
    }
}

#[async_trait]
impl ResourceProvider for LocalProvider {
    fn schemas(&self) -> Vec<ResourceSchema> {
        self.schemas.values().cloned().collect()
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        _attributes: &Attributes,
    ) -> Result<ProviderResponse, ProviderError> {
        let schema = self.schema(ctx.resource_type())?;
        let suffix = Uuid::new_v4().simple().to_string();
        let id = format!("{}-{}", schema.resource_type, &suffix[..12]);
        debug!("Local provider created {} as {id}", ctx.resource);

        Ok(ProviderResponse {
            outputs: Self::outputs_for(schema, &id),
            id,
        })
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        provider_id: &str,
        changes: &Attributes,
    ) -> Result<ProviderResponse, ProviderError> {
        let schema = self.schema(ctx.resource_type())?;
        debug!(
            "Local provider updated {} ({provider_id}): {} attribute(s)",
            ctx.resource,
            changes.len()
        );

        Ok(ProviderResponse {
            id: provider_id.to_string(),
            outputs: Self::outputs_for(schema, provider_id),
        })
    }

    async fn destroy(&self, ctx: &OperationContext, provider_id: &str) -> Result<(), ProviderError> {
        self.schema(ctx.resource_type())?;
        debug!("Local provider destroyed {} ({provider_id})", ctx.resource);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelSignal;
    use crate::graph::ResourceId;

    fn provider() -> LocalProvider {
        LocalProvider::new([ResourceSchema::new("bucket").attribute("acl").output("arn")])
    }

    fn ctx(resource_type: &str) -> OperationContext {
        OperationContext::new(ResourceId::new(resource_type, "site"), CancelSignal::new())
    }

    #[tokio::test]
    async fn test_create_assigns_id_and_outputs() {
        let response = provider()
            .create(&ctx("bucket"), &Attributes::new())
            .await
            .expect("create succeeds");

        assert!(response.id.starts_with("bucket-"));
        let arn = response.outputs.get("arn").and_then(|v| v.as_str()).unwrap_or_default();
        assert_eq!(arn, format!("local:bucket/{}/arn", response.id));
    }

    #[tokio::test]
    async fn test_update_keeps_id() {
        let response = provider()
            .update(&ctx("bucket"), "bucket-abc", &Attributes::new())
            .await
            .expect("update succeeds");
        assert_eq!(response.id, "bucket-abc");
    }

    #[tokio::test]
    async fn test_unknown_type_rejected() {
        let err = provider()
            .destroy(&ctx("queue"), "queue-1")
            .await
            .expect_err("unknown type");
        assert!(matches!(err, ProviderError::UnknownResourceType { .. }));
    }
}
