//! In-memory remote store for deterministic testing.
//!
//! Behaves like the PostgREST store as far as reconciliation can observe:
//! unique natural keys per table raise `Error::Conflict`, ids are opaque
//! strings, patches merge columns. Failures can be injected per operation,
//! table and column value, and every call is logged for assertions.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use arbor_store::{MemoryStore, StoreOp};
//!
//! let store = MemoryStore::with_default_schema()
//!     .fail_on(StoreOp::Create, "workspaces", "code", "beta");
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use arbor_core::{Error, JsonMap, NaturalKey, RemoteRecord, RemoteStore, Result};

/// Store operation, for call logs and failure rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Create,
    Find,
    Patch,
    List,
}

/// One logged call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    pub op: StoreOp,
    pub table: String,
}

#[derive(Debug, Clone)]
struct FailureRule {
    op: StoreOp,
    table: String,
    /// Column/value the record, key or row must carry; `None` matches all.
    matching: Option<(String, String)>,
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<String, Vec<RemoteRecord>>,
    unique_keys: HashMap<String, Vec<String>>,
    failures: Vec<FailureRule>,
    blind_lookups: HashSet<String>,
    patch_returns_body: bool,
    calls: Vec<StoreCall>,
}

/// In-memory [`RemoteStore`].
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store without any unique keys.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                patch_returns_body: true,
                ..Default::default()
            })),
        }
    }

    /// Store with the unique keys of the reconciled schema.
    ///
    /// `stakeholders` deliberately has none.
    pub fn with_default_schema() -> Self {
        Self::new()
            .with_unique_key("workspaces", &["code"])
            .with_unique_key("projects", &["workspace_id", "code"])
            .with_unique_key("documents", &["workspace_id", "slug"])
            .with_unique_key("user_service_configs", &["user_id", "service_name"])
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Declare a unique natural key on a table.
    pub fn with_unique_key(self, table: &str, columns: &[&str]) -> Self {
        self.state().unique_keys.insert(
            table.to_string(),
            columns.iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    /// Fail `op` on `table` with a transport error when the record, key or
    /// target row has `column == value`.
    pub fn fail_on(self, op: StoreOp, table: &str, column: &str, value: &str) -> Self {
        self.state().failures.push(FailureRule {
            op,
            table: table.to_string(),
            matching: Some((column.to_string(), value.to_string())),
        });
        self
    }

    /// Fail every `op` on `table` with a transport error.
    pub fn fail_all(self, op: StoreOp, table: &str) -> Self {
        self.state().failures.push(FailureRule {
            op,
            table: table.to_string(),
            matching: None,
        });
        self
    }

    /// Make natural-key lookups on `table` find nothing, as if the
    /// conflicting row vanished between the insert and the lookup.
    pub fn with_blind_lookups(self, table: &str) -> Self {
        self.state().blind_lookups.insert(table.to_string());
        self
    }

    /// Answer patches without a body, like `Prefer: return=minimal`.
    pub fn without_patch_body(self) -> Self {
        self.state().patch_returns_body = false;
        self
    }

    /// Insert a row directly, bypassing constraints and the call log.
    pub fn seed(&self, table: &str, fields: JsonValue) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let fields = match fields {
            JsonValue::Object(map) => map,
            _ => JsonMap::new(),
        };
        self.state()
            .tables
            .entry(table.to_string())
            .or_default()
            .push(RemoteRecord {
                id: id.clone(),
                fields,
            });
        id
    }

    /// Current rows of a table, in insertion order.
    pub fn rows(&self, table: &str) -> Vec<RemoteRecord> {
        self.state().tables.get(table).cloned().unwrap_or_default()
    }

    /// Get all logged calls for assertion.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.state().calls.clone()
    }

    /// Number of logged calls of one operation on one table.
    pub fn call_count(&self, op: StoreOp, table: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.op == op && c.table == table)
            .count()
    }

    /// Clear the call log.
    pub fn clear_calls(&self) {
        self.state().calls.clear()
    }
}

impl State {
    fn log(&mut self, op: StoreOp, table: &str) {
        self.calls.push(StoreCall {
            op,
            table: table.to_string(),
        });
    }

    fn check_failure(&self, op: StoreOp, table: &str, columns: &[(&str, &str)]) -> Result<()> {
        let hit = self.failures.iter().any(|rule| {
            rule.op == op
                && rule.table == table
                && match &rule.matching {
                    None => true,
                    Some((column, value)) => columns
                        .iter()
                        .any(|(c, v)| *c == column.as_str() && *v == value.as_str()),
                }
        });
        if hit {
            return Err(Error::Transport(format!(
                "injected {:?} failure on {}",
                op, table
            )));
        }
        Ok(())
    }

    fn find_conflict(&self, table: &str, record: &JsonMap) -> Option<String> {
        let columns = self.unique_keys.get(table)?;
        let rows = self.tables.get(table)?;
        rows.iter()
            .find(|row| {
                columns
                    .iter()
                    .all(|c| record.get(c).is_some() && row.fields.get(c) == record.get(c))
            })
            .map(|_| {
                columns
                    .iter()
                    .map(|c| {
                        format!(
                            "{}={}",
                            c,
                            record.get(c).and_then(JsonValue::as_str).unwrap_or("?")
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(", ")
            })
    }
}

fn string_columns(map: &JsonMap) -> impl Iterator<Item = (&str, &str)> {
    map.iter()
        .filter_map(|(k, v)| v.as_str().map(|s| (k.as_str(), s)))
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn create(&self, table: &str, record: &JsonMap) -> Result<RemoteRecord> {
        let mut state = self.state();
        state.log(StoreOp::Create, table);
        let columns: Vec<(&str, &str)> = string_columns(record).collect();
        state.check_failure(StoreOp::Create, table, &columns)?;

        if let Some(key) = state.find_conflict(table, record) {
            return Err(Error::Conflict {
                table: table.to_string(),
                message: format!("duplicate key {}", key),
            });
        }

        let row = RemoteRecord {
            id: uuid::Uuid::new_v4().to_string(),
            fields: record.clone(),
        };
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        Ok(row)
    }

    async fn find_by_natural_key(
        &self,
        table: &str,
        key: &NaturalKey,
    ) -> Result<Option<RemoteRecord>> {
        let mut state = self.state();
        state.log(StoreOp::Find, table);
        state.check_failure(StoreOp::Find, table, &key.columns().collect::<Vec<_>>())?;

        if state.blind_lookups.contains(table) {
            return Ok(None);
        }
        Ok(state
            .tables
            .get(table)
            .and_then(|rows| rows.iter().find(|row| key.matches(row)))
            .cloned())
    }

    async fn patch(
        &self,
        table: &str,
        id: &str,
        partial: &JsonMap,
    ) -> Result<Option<RemoteRecord>> {
        let mut state = self.state();
        state.log(StoreOp::Patch, table);

        let target: Vec<(String, String)> = state
            .tables
            .get(table)
            .and_then(|rows| rows.iter().find(|row| row.id == id))
            .map(|row| {
                string_columns(&row.fields)
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        let target: Vec<(&str, &str)> =
            target.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        state.check_failure(StoreOp::Patch, table, &target)?;

        let returns_body = state.patch_returns_body;
        let Some(row) = state
            .tables
            .get_mut(table)
            .and_then(|rows| rows.iter_mut().find(|row| row.id == id))
        else {
            return Ok(None);
        };
        for (k, v) in partial {
            row.fields.insert(k.clone(), v.clone());
        }
        Ok(returns_body.then(|| row.clone()))
    }

    async fn list_by_parent(&self, table: &str, parent: &NaturalKey) -> Result<Vec<RemoteRecord>> {
        let mut state = self.state();
        state.log(StoreOp::List, table);
        state.check_failure(StoreOp::List, table, &parent.columns().collect::<Vec<_>>())?;

        Ok(state
            .tables
            .get(table)
            .map(|rows| rows.iter().filter(|row| parent.matches(row)).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: JsonValue) -> JsonMap {
        match value {
            JsonValue::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[tokio::test]
    async fn test_create_then_conflict_on_unique_key() {
        let store = MemoryStore::with_default_schema();
        let first = store
            .create("workspaces", &map(json!({"code": "acme", "name": "A"})))
            .await
            .unwrap();
        assert!(!first.id.is_empty());

        let err = store
            .create("workspaces", &map(json!({"code": "acme", "name": "B"})))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.rows("workspaces").len(), 1);
    }

    #[tokio::test]
    async fn test_stakeholders_have_no_unique_key() {
        let store = MemoryStore::with_default_schema();
        let record = map(json!({"workspace_id": "w", "name": "Same"}));
        store.create("stakeholders", &record).await.unwrap();
        store.create("stakeholders", &record).await.unwrap();
        assert_eq!(store.rows("stakeholders").len(), 2);
    }

    #[tokio::test]
    async fn test_find_and_patch() {
        let store = MemoryStore::with_default_schema();
        let id = store.seed("workspaces", json!({"code": "acme", "description": "old"}));
        let key = NaturalKey::new().with("code", "acme");

        let found = store.find_by_natural_key("workspaces", &key).await.unwrap().unwrap();
        assert_eq!(found.id, id);

        let patched = store
            .patch("workspaces", &id, &map(json!({"description": "new"})))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(patched.get_str("description"), Some("new"));
        assert_eq!(patched.get_str("code"), Some("acme"));
    }

    #[tokio::test]
    async fn test_patch_without_body() {
        let store = MemoryStore::with_default_schema().without_patch_body();
        let id = store.seed("workspaces", json!({"code": "acme"}));
        let result = store
            .patch("workspaces", &id, &map(json!({"name": "x"})))
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(store.rows("workspaces")[0].get_str("name"), Some("x"));
    }

    #[tokio::test]
    async fn test_list_by_parent_filters() {
        let store = MemoryStore::new();
        store.seed("stakeholders", json!({"workspace_id": "w1"}));
        store.seed("stakeholders", json!({"workspace_id": "w2"}));
        store.seed("stakeholders", json!({"workspace_id": "w1"}));
        let parent = NaturalKey::new().with("workspace_id", "w1");
        let rows = store.list_by_parent("stakeholders", &parent).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_fail_on_matching_value_only() {
        let store = MemoryStore::with_default_schema().fail_on(
            StoreOp::Create,
            "workspaces",
            "code",
            "beta",
        );
        let err = store
            .create("workspaces", &map(json!({"code": "beta"})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert!(store
            .create("workspaces", &map(json!({"code": "acme"})))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_blind_lookups() {
        let store = MemoryStore::with_default_schema().with_blind_lookups("workspaces");
        store.seed("workspaces", json!({"code": "acme"}));
        let key = NaturalKey::new().with("code", "acme");
        assert!(store.find_by_natural_key("workspaces", &key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_call_log() {
        let store = MemoryStore::new();
        store.create("t", &JsonMap::new()).await.unwrap();
        store
            .list_by_parent("t", &NaturalKey::new())
            .await
            .unwrap();
        assert_eq!(store.call_count(StoreOp::Create, "t"), 1);
        assert_eq!(store.call_count(StoreOp::List, "t"), 1);
        assert_eq!(store.calls().len(), 2);
        store.clear_calls();
        assert!(store.calls().is_empty());
    }
}
