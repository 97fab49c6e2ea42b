//! Resource type to provider routing.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::{ConfigError, ProviderError, Result};

use super::capability::ResourceProvider;
use super::http::HttpProvider;
use super::local::LocalProvider;
use super::schema::ResourceSchema;

/// Routes each resource type to exactly one provider.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn ResourceProvider>>,
    schemas: BTreeMap<String, ResourceSchema>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("resource_types", &self.schemas.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from the document's provider sections.
    ///
    /// # Errors
    ///
    /// Returns an error if a provider cannot be constructed or two providers
    /// serve the same resource type.
    pub fn from_config(providers: &[ProviderConfig]) -> Result<Self> {
        let mut registry = Self::new();
        for config in providers {
            let provider: Arc<dyn ResourceProvider> = match config.kind {
                ProviderKind::Local => Arc::new(LocalProvider::new(config.resources.clone())),
                ProviderKind::Http => Arc::new(HttpProvider::from_config(config)?),
            };
            debug!("Registering provider '{}' ({:?})", config.name, config.kind);
            registry.register(provider)?;
        }
        Ok(registry)
    }

    /// Registers a provider for every type it declares.
    ///
    /// # Errors
    ///
    /// Returns an error if any of its types is already served.
    pub fn register(&mut self, provider: Arc<dyn ResourceProvider>) -> Result<()> {
        let schemas = provider.schemas();
        if let Some(taken) = schemas
            .iter()
            .find(|s| self.schemas.contains_key(&s.resource_type))
        {
            return Err(ConfigError::validation(
                format!("resource type '{}' is served by more than one provider", taken.resource_type),
                "providers",
            )
            .into());
        }

        for schema in schemas {
            self.providers
                .insert(schema.resource_type.clone(), Arc::clone(&provider));
            self.schemas.insert(schema.resource_type.clone(), schema);
        }
        Ok(())
    }

    /// Returns the provider serving a type.
    ///
    /// # Errors
    ///
    /// Returns an error if no provider serves the type.
    pub fn provider(&self, resource_type: &str) -> std::result::Result<Arc<dyn ResourceProvider>, ProviderError> {
        self.providers
            .get(resource_type)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownResourceType {
                resource_type: resource_type.to_string(),
            })
    }

    /// Returns the schema for a type, if served.
    #[must_use]
    pub fn schema(&self, resource_type: &str) -> Option<&ResourceSchema> {
        self.schemas.get(resource_type)
    }

    /// Returns true if the type is served.
    #[must_use]
    pub fn serves(&self, resource_type: &str) -> bool {
        self.schemas.contains_key(resource_type)
    }

    /// Served resource types in sorted order.
    pub fn resource_types(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }
}
