//! Document validation.
//!
//! Checks everything that can be checked without a provider registry:
//! names, backend settings, apply tuning, provider sections and schemas.
//! Reference and schema conformance of resources is checked by the graph
//! builder.

use crate::error::{ConfigError, Result, StratumError};
use std::collections::HashSet;
use tracing::debug;

use super::document::{
    ApplySettings, DesiredDocument, ProjectConfig, ProviderConfig, ProviderKind,
    ResourceDeclaration, StateBackend, StateConfig,
};

/// Validator for desired-state documents.
#[derive(Debug, Default)]
pub struct DocumentValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl DocumentValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a document, returning every finding.
    #[must_use]
    pub fn check(&self, document: &DesiredDocument) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_project(&document.project, &mut result);
        Self::validate_state(&document.state, &mut result);
        Self::validate_apply(&document.apply, &mut result);
        Self::validate_providers(&document.providers, &mut result);
        Self::validate_resources(&document.resources, &mut result);

        result
    }

    /// Validates a document.
    ///
    /// # Errors
    ///
    /// Returns the first validation error found.
    pub fn validate(&self, document: &DesiredDocument) -> Result<ValidationResult> {
        let result = self.check(document);

        if result.errors.is_empty() {
            debug!("Document validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(StratumError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    fn validate_project(project: &ProjectConfig, result: &mut ValidationResult) {
        if project.name.is_empty() {
            result.error("project.name", "Project name cannot be empty");
        } else if !is_valid_name(&project.name) {
            result.error(
                "project.name",
                format!(
                    "Project name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    project.name
                ),
            );
        }

        if project.environment.is_empty() {
            result.error("project.environment", "Environment cannot be empty");
        }
    }

    fn validate_state(state: &StateConfig, result: &mut ValidationResult) {
        match state.backend {
            StateBackend::S3 => {
                if state.bucket.as_ref().is_none_or(String::is_empty) {
                    result.error(
                        "state.bucket",
                        "S3 bucket name is required when using S3 backend",
                    );
                }
            }
            StateBackend::Local => {
                if state.path.as_ref().is_some_and(String::is_empty) {
                    result.error("state.path", "State path cannot be empty");
                }
                if state.bucket.is_some() {
                    result
                        .warnings
                        .push(String::from("state.bucket: ignored by the local backend"));
                }
            }
        }
    }

    fn validate_apply(apply: &ApplySettings, result: &mut ValidationResult) {
        if apply.parallelism == 0 {
            result.error("apply.parallelism", "Parallelism must be at least 1");
        }
        if apply.max_attempts == 0 {
            result.error("apply.max_attempts", "Max attempts must be at least 1");
        }
        if apply.base_delay_ms > apply.max_delay_ms {
            result.error(
                "apply.base_delay_ms",
                format!(
                    "Base delay {}ms exceeds max delay {}ms",
                    apply.base_delay_ms, apply.max_delay_ms
                ),
            );
        }
        if apply.max_attempts > 10 {
            result.warnings.push(format!(
                "apply.max_attempts: {} attempts per operation is unusual",
                apply.max_attempts
            ));
        }
    }

    fn validate_providers(providers: &[ProviderConfig], result: &mut ValidationResult) {
        let mut seen_names = HashSet::new();
        let mut seen_types = HashSet::new();

        for (i, provider) in providers.iter().enumerate() {
            let prefix = format!("providers[{i}]");

            if !seen_names.insert(&provider.name) {
                result.error(
                    format!("{prefix}.name"),
                    format!("Duplicate provider name: {}", provider.name),
                );
            }

            match provider.kind {
                ProviderKind::Http => match provider.endpoint.as_deref() {
                    None | Some("") => result.error(
                        format!("{prefix}.endpoint"),
                        "Endpoint is required for http providers",
                    ),
                    Some(endpoint)
                        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") =>
                    {
                        result.error(
                            format!("{prefix}.endpoint"),
                            format!("Endpoint '{endpoint}' must be an http(s) URL"),
                        );
                    }
                    Some(_) => {}
                },
                ProviderKind::Local => {
                    if provider.endpoint.is_some() || provider.token_env.is_some() {
                        result.warnings.push(format!(
                            "{prefix}: endpoint and token_env are ignored by local providers"
                        ));
                    }
                }
            }

            if provider.resources.is_empty() {
                result
                    .warnings
                    .push(format!("{prefix}.resources: provider serves no resource types"));
            }

            for (j, schema) in provider.resources.iter().enumerate() {
                let field = format!("{prefix}.resources[{j}]");

                if !is_valid_identifier(&schema.resource_type) {
                    result.error(
                        format!("{field}.type"),
                        format!("Resource type '{}' is invalid", schema.resource_type),
                    );
                }
                if !seen_types.insert(&schema.resource_type) {
                    result.error(
                        format!("{field}.type"),
                        format!(
                            "Resource type '{}' is served by more than one provider",
                            schema.resource_type
                        ),
                    );
                }
                for name in schema.attributes.keys() {
                    if schema.outputs.contains(name) || name == "id" {
                        result.error(
                            format!("{field}.attributes.{name}"),
                            format!("'{name}' cannot be both an input and an output"),
                        );
                    }
                }
            }
        }
    }

    fn validate_resources(resources: &[ResourceDeclaration], result: &mut ValidationResult) {
        if resources.is_empty() {
            result
                .warnings
                .push(String::from("No resources defined in document"));
            return;
        }

        for (i, resource) in resources.iter().enumerate() {
            let prefix = format!("resources[{i}]");

            if !is_valid_identifier(&resource.resource_type) {
                result.error(
                    format!("{prefix}.type"),
                    format!("Resource type '{}' is invalid", resource.resource_type),
                );
            }
            if !is_valid_identifier(&resource.name) {
                result.error(
                    format!("{prefix}.name"),
                    format!(
                        "Resource name '{}' is invalid. Must start with a letter and contain only letters, digits, '_' or '-'.",
                        resource.name
                    ),
                );
            }
        }
    }
}

/// Validates that a project name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }

    if chars.any(|c| !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-') {
        return false;
    }

    !name.ends_with('-') && !name.contains("--")
}

/// Validates a resource type or resource name.
fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl ValidationResult {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_document;
    use crate::graph::GraphBuilder;
    use crate::provider::{LocalProvider, ProviderRegistry, ResourceSchema};
    use std::sync::Arc;

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("static-site"));
        assert!(is_valid_name("site-123"));
        assert!(is_valid_name("a"));
    }

    #[test]
    fn test_invalid_name() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Static-Site"));
        assert!(!is_valid_name("123-site"));
        assert!(!is_valid_name("static_site"));
        assert!(!is_valid_name("site-"));
        assert!(!is_valid_name("static--site"));
    }

    #[test]
    fn test_identifiers() {
        assert!(is_valid_identifier("web_server"));
        assert!(is_valid_identifier("Subnet-1"));
        assert!(!is_valid_identifier("1subnet"));
        assert!(!is_valid_identifier("a.b"));
        assert!(!is_valid_identifier(""));
    }

    #[test]
    fn test_valid_document() {
        let document = parse_document(
            r"
project: { name: site }
providers:
  - { name: sim, kind: local, resources: [{ type: network }] }
resources:
  - { type: network, name: main }
",
        )
        .expect("parses");
        let result = DocumentValidator::new().validate(&document).expect("valid");
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 0);
    }

    #[test]
    fn test_collects_errors() {
        let document = parse_document(
            r"
project: { name: Site }
state: { backend: s3 }
apply: { parallelism: 0 }
providers:
  - { name: api, kind: http, resources: [{ type: network }] }
  - { name: api, kind: local, resources: [{ type: network }] }
resources:
  - { type: network, name: 1main }
",
        )
        .expect("parses");

        let result = DocumentValidator::new().check(&document);
        let fields: Vec<&str> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"project.name"));
        assert!(fields.contains(&"state.bucket"));
        assert!(fields.contains(&"apply.parallelism"));
        assert!(fields.contains(&"providers[0].endpoint"));
        assert!(fields.contains(&"providers[1].name"));
        assert!(fields.contains(&"providers[1].resources[0].type"));
        assert!(fields.contains(&"resources[0].name"));
        assert!(DocumentValidator::new().validate(&document).is_err());
    }

    #[test]
    fn test_empty_document_warns() {
        let document = parse_document("project: { name: site }").expect("parses");
        let result = DocumentValidator::new().check(&document);
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 1);
    }

    #[test]
    fn test_graph_errors_left_to_graph_builder() {
        let document = parse_document(
            r"
project: { name: site }
resources:
  - { type: network, name: main }
  - { type: network, name: main }
  - { type: network, name: edge, depends_on: [network.edge] }
",
        )
        .expect("parses");
        assert!(DocumentValidator::new().validate(&document).is_ok());

        let mut registry = ProviderRegistry::new();
        registry
            .register(Arc::new(LocalProvider::new([ResourceSchema::new("network")])))
            .expect("registers");
        let err = GraphBuilder::new(&registry).build(&document).expect_err("duplicate");
        assert!(matches!(
            err,
            StratumError::Config(ConfigError::DuplicateResource { ref id }) if id == "network.main"
        ));

        let mut document = document;
        document.resources.remove(1);
        let err = GraphBuilder::new(&registry).build(&document).expect_err("self dependency");
        assert!(matches!(
            err,
            StratumError::Config(ConfigError::CyclicDependency { ref cycle }) if cycle.contains(&String::from("network.edge"))
        ));
    }
}
