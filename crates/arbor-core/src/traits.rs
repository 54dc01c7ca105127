//! Core traits for arbor abstractions.
//!
//! The remote store is reached only through [`RemoteStore`], so the
//! reconciliation engine runs unchanged against the REST client or the
//! in-memory store used in tests.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{JsonMap, NaturalKey, RemoteRecord};

/// Typed access to the remote relational store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Insert a record.
    ///
    /// A uniqueness violation must surface as `Error::Conflict`, never as a
    /// generic transport failure: the constraint strategy depends on it.
    async fn create(&self, table: &str, record: &JsonMap) -> Result<RemoteRecord>;

    /// Equality lookup on every column of `key`. `Ok(None)` when no row matches.
    async fn find_by_natural_key(&self, table: &str, key: &NaturalKey)
        -> Result<Option<RemoteRecord>>;

    /// Partial update by opaque id.
    ///
    /// Returns the updated row, or `None` when the store answers without a
    /// body. Callers never include natural-key columns in `partial`.
    async fn patch(&self, table: &str, id: &str, partial: &JsonMap)
        -> Result<Option<RemoteRecord>>;

    /// Every row whose columns equal `parent`.
    async fn list_by_parent(&self, table: &str, parent: &NaturalKey) -> Result<Vec<RemoteRecord>>;
}
