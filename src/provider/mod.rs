//! Resource providers.
//!
//! A provider owns the remote lifecycle of one or more resource types. The
//! registry routes every operation to the provider that declared its type.

mod capability;
mod http;
mod local;
mod registry;
mod schema;

#[cfg(test)]
pub use capability::MockResourceProvider;
pub use capability::{Attributes, OperationContext, ProviderResponse, ResourceProvider};
pub use http::HttpProvider;
pub use local::LocalProvider;
pub use registry::ProviderRegistry;
pub use schema::{AttributeRole, AttributeSchema, ResourceSchema};
