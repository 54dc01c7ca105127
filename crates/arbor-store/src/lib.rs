//! # arbor-store
//!
//! Implementations of [`arbor_core::RemoteStore`].
//!
//! - [`RestStore`]: the PostgREST dialect spoken by the production store.
//! - `MemoryStore` (feature `mock`): an in-process store with unique-key
//!   enforcement and failure injection, for reconciliation tests.
//!
//! ## Example
//!
//! ```rust,ignore
//! use arbor_store::{RestStore, StoreConfig};
//!
//! let store = RestStore::new(StoreConfig::from_env()?)?;
//! let row = store.find_by_natural_key("workspaces", &key).await?;
//! ```

pub mod config;
pub mod rest;

#[cfg(any(test, feature = "mock"))]
pub mod memory;

pub use config::StoreConfig;
pub use rest::RestStore;

#[cfg(any(test, feature = "mock"))]
pub use memory::{MemoryStore, StoreCall, StoreOp};

// Re-export core types
pub use arbor_core::*;
