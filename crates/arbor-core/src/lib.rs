//! # arbor-core
//!
//! Core types, traits, and abstractions for arbor.
//!
//! This crate provides the entity model shared by the collector, the remote
//! store clients and the reconciliation engine, plus the pure key derivation
//! functions that give documents and stakeholders their identities.

pub mod defaults;
pub mod error;
pub mod keys;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use keys::{build_slug, derive_doc_type, derive_stakeholder_identity, project_display_name};
pub use models::*;
pub use traits::*;
