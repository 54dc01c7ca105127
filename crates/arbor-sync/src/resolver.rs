//! Identity resolution strategies.
//!
//! Every entity kind reaches the store through one of two strategies, chosen
//! by [`EntityKind::identity_rule`](arbor_core::EntityKind::identity_rule):
//!
//! - [`KeyConstraintStrategy`]: insert first; on a uniqueness conflict, look
//!   the row up by its natural key and patch its payload.
//! - [`ScanMatchStrategy`]: list the parent's children, match on an identity
//!   value stored inside each row, then patch the match or insert.
//!
//! The scan strategy is check-then-act. Two writers scanning the same parent
//! at the same time can both miss and both insert, so runs assume a single
//! writer and never scan one parent concurrently.

use async_trait::async_trait;
use tracing::{debug, trace};

use arbor_core::{Error, IdentityRule, JsonMap, RemoteRecord, RemoteStore, Result, UpsertCandidate};

/// Whether a record was inserted or an existing row was updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
}

/// The remote row a candidate resolved to.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub record: RemoteRecord,
    pub outcome: Outcome,
}

/// Resolves a candidate to exactly one remote row, creating it if needed.
#[async_trait]
pub trait IdentityStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn resolve(
        &self,
        store: &dyn RemoteStore,
        candidate: &UpsertCandidate,
    ) -> Result<Resolution>;
}

/// Strategy for an identity rule.
pub fn strategy_for(rule: IdentityRule) -> Box<dyn IdentityStrategy> {
    match rule {
        IdentityRule::KeyConstraint => Box::new(KeyConstraintStrategy),
        IdentityRule::ScanMatch { path } => Box::new(ScanMatchStrategy::new(path)),
    }
}

/// Payload with every natural-key column removed. Key columns are written
/// on create and never patched.
fn patch_body(candidate: &UpsertCandidate) -> JsonMap {
    candidate
        .payload
        .iter()
        .filter(|(column, _)| !candidate.key.contains_column(column))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Create, and on conflict fall back to find-then-patch.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyConstraintStrategy;

#[async_trait]
impl IdentityStrategy for KeyConstraintStrategy {
    fn name(&self) -> &'static str {
        "key_constraint"
    }

    async fn resolve(
        &self,
        store: &dyn RemoteStore,
        candidate: &UpsertCandidate,
    ) -> Result<Resolution> {
        let table = candidate.table();

        match store.create(table, &candidate.full_record()).await {
            Ok(record) => {
                return Ok(Resolution {
                    record,
                    outcome: Outcome::Created,
                })
            }
            Err(e) if e.is_conflict() => {
                debug!(
                    db_table = table,
                    natural_key = %candidate.key,
                    "Insert conflicted, falling back to update"
                );
            }
            Err(e) => return Err(e),
        }

        let existing = store
            .find_by_natural_key(table, &candidate.key)
            .await?
            .ok_or_else(|| Error::RecordInconsistency {
                table: table.to_string(),
                key: candidate.key.to_string(),
            })?;

        let patched = store
            .patch(table, &existing.id, &patch_body(candidate))
            .await?;

        Ok(Resolution {
            record: patched.unwrap_or(existing),
            outcome: Outcome::Updated,
        })
    }
}

/// Match by an identity value embedded in each row, scanning the rows that
/// share the candidate's parent key.
#[derive(Debug, Clone, Copy)]
pub struct ScanMatchStrategy {
    path: &'static [&'static str],
}

impl ScanMatchStrategy {
    pub fn new(path: &'static [&'static str]) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &'static [&'static str] {
        self.path
    }
}

#[async_trait]
impl IdentityStrategy for ScanMatchStrategy {
    fn name(&self) -> &'static str {
        "scan_match"
    }

    async fn resolve(
        &self,
        store: &dyn RemoteStore,
        candidate: &UpsertCandidate,
    ) -> Result<Resolution> {
        let table = candidate.table();
        let identity = candidate
            .payload_lookup(self.path)
            .filter(|v| !v.is_null())
            .ok_or_else(|| {
                Error::IdentityDerivation(format!(
                    "{} has no value at {}",
                    candidate.label,
                    self.path.join(".")
                ))
            })?;

        let siblings = store.list_by_parent(table, &candidate.key).await?;
        trace!(
            db_table = table,
            natural_key = %candidate.key,
            record_count = siblings.len(),
            "Scanning siblings for embedded identity"
        );

        // First match wins; duplicates already in the store are left alone.
        let matched = siblings
            .into_iter()
            .find(|row| row.lookup(self.path) == Some(identity));

        match matched {
            Some(existing) => {
                debug!(
                    db_table = table,
                    record_id = %existing.id,
                    identity = %identity,
                    "Matched existing row by embedded identity"
                );
                let patched = store
                    .patch(table, &existing.id, &patch_body(candidate))
                    .await?;
                Ok(Resolution {
                    record: patched.unwrap_or(existing),
                    outcome: Outcome::Updated,
                })
            }
            None => {
                let record = store.create(table, &candidate.full_record()).await?;
                Ok(Resolution {
                    record,
                    outcome: Outcome::Created,
                })
            }
        }
    }
}
