//! Desired-state document loading.
//!
//! Documents are YAML (JSON is accepted as a YAML subset). Environment
//! variables override a handful of document values, and a `.env` file next
//! to the document is loaded first if present.

use crate::error::{ConfigError, Result, StratumError};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::document::DesiredDocument;

/// Default document file names, in search order.
pub const DEFAULT_DOCUMENT_FILES: &[&str] = &["stratum.yaml", "stratum.yml", "stratum.json"];

/// Loader for desired-state documents.
#[derive(Debug, Default)]
pub struct DocumentLoader {
    /// Directory holding the `.env` file.
    base_path: Option<PathBuf>,
}

impl DocumentLoader {
    /// Creates a new loader.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the directory searched for `.env`.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a document from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<DesiredDocument> {
        let path = path.as_ref();
        info!("Loading document from: {}", path.display());

        if !path.exists() {
            return Err(StratumError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            StratumError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        Self::parse(&content, Some(path))
    }

    /// Parses a document from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the content is not a valid document.
    pub fn parse(content: &str, source: Option<&Path>) -> Result<DesiredDocument> {
        debug!("Parsing desired-state document");

        let document: DesiredDocument = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string()).or_else(|| {
                e.location()
                    .map(|l| format!("line {}, column {}", l.line(), l.column()))
            });
            StratumError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Parsed document for project {} with {} resource(s)",
            document.project.name,
            document.resources.len()
        );
        Ok(document)
    }

    /// Loads a document and applies `STRATUM_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded or an override is
    /// malformed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<DesiredDocument> {
        let mut document = self.load_file(path)?;
        apply_env_overrides(&mut document, |name| std::env::var(name).ok())?;
        Ok(document)
    }

    /// Loads the `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                StratumError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Parses a document from a string.
///
/// # Errors
///
/// Returns an error if the content is not a valid document.
pub fn parse_document(content: &str) -> Result<DesiredDocument> {
    DocumentLoader::parse(content, None)
}

/// Applies environment overrides using `lookup` to read variables.
///
/// # Errors
///
/// Returns an error if `STRATUM_PARALLELISM` is not a positive integer.
pub fn apply_env_overrides<F>(document: &mut DesiredDocument, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(name) = lookup("STRATUM_PROJECT_NAME") {
        debug!("Overriding project.name from environment");
        document.project.name = name;
    }

    if let Some(environment) = lookup("STRATUM_ENVIRONMENT") {
        debug!("Overriding project.environment from environment");
        document.project.environment = environment;
    }

    if let Some(path) = lookup("STRATUM_STATE_PATH") {
        debug!("Overriding state.path from environment");
        document.state.path = Some(path);
    }

    if let Some(bucket) = lookup("STRATUM_STATE_BUCKET") {
        debug!("Overriding state.bucket from environment");
        document.state.bucket = Some(bucket);
    }

    if let Some(prefix) = lookup("STRATUM_STATE_PREFIX") {
        debug!("Overriding state.prefix from environment");
        document.state.prefix = Some(prefix);
    }

    if let Some(raw) = lookup("STRATUM_PARALLELISM") {
        let parallelism = raw
            .parse::<usize>()
            .ok()
            .filter(|p| *p > 0)
            .ok_or_else(|| {
                ConfigError::validation(
                    format!("STRATUM_PARALLELISM must be a positive integer, got '{raw}'"),
                    "apply.parallelism",
                )
            })?;
        debug!("Overriding apply.parallelism from environment");
        document.apply.parallelism = parallelism;
    }

    Ok(())
}

/// Finds the document in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no document is found.
pub fn find_document_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_DOCUMENT_FILES {
            let candidate = current.join(filename);
            if candidate.exists() {
                info!("Found document: {}", candidate.display());
                return Ok(candidate);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(StratumError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_DOCUMENT_FILES[0]),
    }))
}
