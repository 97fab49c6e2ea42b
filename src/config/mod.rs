//! Desired-state document handling.
//!
//! This module covers everything before the graph is built:
//! - Parsing `stratum.yaml` (or `.yml`/`.json`) with environment overrides
//! - Validation of names, backends and provider sections
//! - Fingerprinting documents for plans and history

mod document;
mod hash;
mod parser;
mod validator;

pub use document::{
    ApplySettings, DesiredDocument, LifecycleConfig, ProjectConfig, ProviderConfig, ProviderKind,
    ResourceDeclaration, StateBackend, StateConfig,
};
pub use hash::DocumentHasher;
pub use parser::{
    DEFAULT_DOCUMENT_FILES, DocumentLoader, apply_env_overrides, find_document_file,
    parse_document,
};
pub use validator::{DocumentValidator, ValidationError, ValidationResult};
