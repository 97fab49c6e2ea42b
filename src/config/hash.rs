//! Document fingerprinting.
//!
//! The fingerprint is recorded in plans and apply history so a run can be
//! traced back to the document that produced it. It plays no part in change
//! detection, which is attribute-level.

use sha2::{Digest, Sha256};

use crate::error::{Result, StratumError};

use super::document::{DesiredDocument, ResourceDeclaration};

/// Hasher for desired-state documents.
#[derive(Debug, Default)]
pub struct DocumentHasher;

impl DocumentHasher {
    /// Creates a new document hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the whole document.
    ///
    /// # Errors
    ///
    /// Returns an error if a provider declaration cannot be encoded.
    pub fn hash_document(&self, document: &DesiredDocument) -> Result<String> {
        let mut hasher = Sha256::new();

        field(&mut hasher, document.project.name.as_bytes());
        field(&mut hasher, document.project.environment.as_bytes());

        // Declaration order does not matter to the graph.
        let mut resources: Vec<&ResourceDeclaration> = document.resources.iter().collect();
        resources.sort_by_key(|r| (&r.resource_type, &r.name));
        field(&mut hasher, &(resources.len() as u64).to_le_bytes());
        for resource in resources {
            field(&mut hasher, self.hash_resource(resource).as_bytes());
        }

        field(&mut hasher, &(document.providers.len() as u64).to_le_bytes());
        for provider in &document.providers {
            // serde_json writes maps in key order, so this is stable.
            let encoded = serde_json::to_vec(provider).map_err(|e| {
                StratumError::internal(format!(
                    "Failed to encode provider '{}' for hashing: {e}",
                    provider.name
                ))
            })?;
            field(&mut hasher, &encoded);
        }

        Ok(hex::encode(hasher.finalize()))
    }

    /// Computes a hash of one declaration.
    #[must_use]
    pub fn hash_resource(&self, resource: &ResourceDeclaration) -> String {
        let mut hasher = Sha256::new();

        field(&mut hasher, resource.resource_type.as_bytes());
        field(&mut hasher, resource.name.as_bytes());
        field(&mut hasher, &(resource.attributes.len() as u64).to_le_bytes());
        for (key, value) in &resource.attributes {
            field(&mut hasher, key.as_bytes());
            field(&mut hasher, value.to_string().as_bytes());
        }

        let mut depends_on: Vec<&String> = resource.depends_on.iter().collect();
        depends_on.sort();
        field(&mut hasher, &(depends_on.len() as u64).to_le_bytes());
        for dependency in depends_on {
            field(&mut hasher, dependency.as_bytes());
        }

        hasher.update([
            u8::from(resource.lifecycle.create_before_destroy),
            u8::from(resource.lifecycle.prevent_destroy),
        ]);

        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes in constant time.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

/// Feeds one length-prefixed field, so adjacent fields cannot run together.
fn field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}
