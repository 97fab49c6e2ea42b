// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// Test code may unwrap and panic
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Stratum
//!
//! A declarative, dependency-ordered reconciler for infrastructure resources.
//!
//! ## Overview
//!
//! Stratum converges a set of resources to a desired-state document:
//!
//! - Resources reference each other's outputs with `${type.name.attr}`
//! - References become graph edges, and the graph must be acyclic
//! - Each run diffs the document against recorded state, attribute by attribute
//! - Operations execute in dependency waves with bounded parallelism
//!
//! ## Architecture
//!
//! 1. **Desired State**: Defined in `stratum.yaml`
//! 2. **Current State**: Recorded by a [`state::StateStore`] after each commit
//! 3. **Planner**: Diffs the two and orders the operations into waves
//! 4. **Executor**: Calls providers, retries transient failures, and commits
//!
//! ## Modules
//!
//! - [`config`]: Document parsing, validation and fingerprinting
//! - [`graph`]: Resource graph construction and cycle detection
//! - [`state`]: Versioned state storage backends (memory, local, S3)
//! - [`provider`]: Provider capability interface and shipped providers
//! - [`planner`]: Diffing, wave scheduling and execution
//! - [`reconciler`]: Locked plan/apply/destroy runs
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: static-site
//!   environment: prod
//!
//! providers:
//!   - name: sim
//!     kind: local
//!     resources:
//!       - type: bucket
//!         attributes: { acl: {} }
//!         outputs: [arn]
//!       - type: cdn
//!         attributes: { origin: { required: true } }
//!
//! resources:
//!   - type: bucket
//!     name: assets
//!     attributes: { acl: private }
//!   - type: cdn
//!     name: edge
//!     attributes: { origin: "${bucket.assets.arn}" }
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cancel;
pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod reconciler;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cancel::CancelSignal;
pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{DesiredDocument, DocumentHasher, DocumentLoader, DocumentValidator};
pub use error::{Result, StratumError};
pub use graph::{GraphBuilder, ResourceGraph, ResourceId};
pub use planner::{DiffEngine, ExecutionPlan, ExecutionReport, PlanExecutor, PlanScheduler};
pub use provider::{ProviderRegistry, ResourceProvider, ResourceSchema};
pub use reconciler::{ReconciliationResult, Reconciler};
pub use state::{LocalStateStore, MemoryStateStore, S3StateStore, StateSnapshot, StateStore};
