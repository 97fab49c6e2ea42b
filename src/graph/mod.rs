//! Resource graph construction.
//!
//! The builder turns a [`DesiredDocument`](crate::config::DesiredDocument)
//! into typed nodes whose references become producer → consumer edges.

mod builder;
mod dag;
mod node;

pub use builder::GraphBuilder;
pub use dag::{Dependency, ResourceGraph};
pub use node::{Expression, Reference, ResourceId, ResourceNode};
