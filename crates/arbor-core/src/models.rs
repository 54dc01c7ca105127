//! Core data models for arbor.
//!
//! Two families of types live here: the *local* candidates produced by the
//! collector from the source tree, and the *remote* shapes exchanged with the
//! store (`NaturalKey`, `RemoteRecord`, `UpsertCandidate`).

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};

/// JSON object as sent to and received from the store.
pub type JsonMap = serde_json::Map<String, JsonValue>;

// =============================================================================
// ENTITY KINDS
// =============================================================================

/// The five entity kinds reconciled by a run, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Workspace,
    Project,
    Document,
    Stakeholder,
    UserServiceConfig,
}

/// How an entity kind's remote counterpart is identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityRule {
    /// The store enforces a unique natural key; conflicts fall back to update.
    KeyConstraint,
    /// No enforced key; match by scanning the parent's children for an
    /// identity value stored at `path` inside each record.
    ScanMatch { path: &'static [&'static str] },
}

/// Metadata path of a stakeholder's external identity.
pub const STAKEHOLDER_IDENTITY_PATH: &[&str] = &["metadata", "json_id"];

impl EntityKind {
    /// All kinds in dependency order.
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Workspace,
        EntityKind::Project,
        EntityKind::Document,
        EntityKind::Stakeholder,
        EntityKind::UserServiceConfig,
    ];

    /// Remote table holding this kind.
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Workspace => "workspaces",
            EntityKind::Project => "projects",
            EntityKind::Document => "documents",
            EntityKind::Stakeholder => "stakeholders",
            EntityKind::UserServiceConfig => "user_service_configs",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Workspace => "workspace",
            EntityKind::Project => "project",
            EntityKind::Document => "document",
            EntityKind::Stakeholder => "stakeholder",
            EntityKind::UserServiceConfig => "user_service_config",
        }
    }

    /// Identity strategy used to reconcile this kind.
    pub fn identity_rule(&self) -> IdentityRule {
        match self {
            EntityKind::Stakeholder => IdentityRule::ScanMatch {
                path: STAKEHOLDER_IDENTITY_PATH,
            },
            _ => IdentityRule::KeyConstraint,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ENUMERATED PAYLOAD FIELDS
// =============================================================================

/// Classification of a project document, derived from its file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    CurrentContext,
    MasterPlan,
    Tasks,
    Readme,
    Other,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::CurrentContext => "current_context",
            DocType::MasterPlan => "master_plan",
            DocType::Tasks => "tasks",
            DocType::Readme => "readme",
            DocType::Other => "other",
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a project, taken from the directory it lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Active,
    Archived,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Active => "active",
            ProjectStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// LOCAL CANDIDATES
// =============================================================================

/// A workspace directory found under `workspaces/`.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalWorkspace {
    pub code: String,
    pub name: String,
    pub description: String,
    pub style_config: JsonMap,
    /// Path relative to the source root.
    pub rel_path: PathBuf,
    pub has_config: bool,
    pub has_readme: bool,
}

/// A project directory inside a workspace.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalProject {
    pub workspace_code: String,
    pub code: String,
    pub name: String,
    pub status: ProjectStatus,
    pub rel_path: PathBuf,
}

/// A markdown document directly inside a project directory.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalDocument {
    pub workspace_code: String,
    pub project_code: String,
    pub file_name: String,
    pub rel_path: PathBuf,
    pub content: String,
}

/// A stakeholder JSON payload.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalStakeholder {
    pub workspace_code: String,
    /// Path relative to the source root, used to name the record in reports.
    pub rel_path: PathBuf,
    pub payload: JsonValue,
}

/// A user discovered from its profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalUser {
    pub user_id: String,
}

/// Whether an external service is configured, as detected by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub key: String,
    pub name: String,
    pub is_configured: bool,
}

/// A local file that belongs to a record but could not be read.
///
/// Carried through the run so the record is reported as failed instead of
/// silently vanishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadableFile {
    pub kind: EntityKind,
    pub rel_path: PathBuf,
    pub reason: String,
}

/// Everything collected from the local source of truth for one run.
#[derive(Debug, Clone, Default)]
pub struct LocalSnapshot {
    pub workspaces: Vec<LocalWorkspace>,
    pub projects: Vec<LocalProject>,
    pub documents: Vec<LocalDocument>,
    pub stakeholders: Vec<LocalStakeholder>,
    pub users: Vec<LocalUser>,
    pub services: Vec<ServiceStatus>,
    pub unreadable: Vec<UnreadableFile>,
}

impl LocalSnapshot {
    /// Number of local records of a given kind, unreadable ones included.
    ///
    /// User service configs are the cross product of users and services.
    pub fn count(&self, kind: EntityKind) -> usize {
        let readable = match kind {
            EntityKind::Workspace => self.workspaces.len(),
            EntityKind::Project => self.projects.len(),
            EntityKind::Document => self.documents.len(),
            EntityKind::Stakeholder => self.stakeholders.len(),
            EntityKind::UserServiceConfig => self.users.len() * self.services.len(),
        };
        readable + self.unreadable_of(kind).count()
    }

    /// Unreadable files belonging to records of a given kind.
    pub fn unreadable_of(&self, kind: EntityKind) -> impl Iterator<Item = &UnreadableFile> {
        self.unreadable.iter().filter(move |u| u.kind == kind)
    }
}

// =============================================================================
// REMOTE SHAPES
// =============================================================================

/// Ordered column/value pairs forming a natural key (or a parent filter).
///
/// Values are always strings on the wire: codes, slugs, user ids and the
/// opaque ids of parent records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct NaturalKey(Vec<(&'static str, String)>);

impl NaturalKey {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a column.
    pub fn with(mut self, column: &'static str, value: impl Into<String>) -> Self {
        self.0.push((column, value.into()));
        self
    }

    pub fn columns(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.0.iter().map(|(c, v)| (*c, v.as_str()))
    }

    pub fn contains_column(&self, column: &str) -> bool {
        self.0.iter().any(|(c, _)| *c == column)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The key as a JSON object, for inclusion in a create body.
    pub fn to_json_map(&self) -> JsonMap {
        self.0
            .iter()
            .map(|(c, v)| (c.to_string(), JsonValue::String(v.clone())))
            .collect()
    }

    /// Whether a record carries exactly these key values.
    pub fn matches(&self, record: &RemoteRecord) -> bool {
        self.0
            .iter()
            .all(|(c, v)| record.get_str(c) == Some(v.as_str()))
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (c, v)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", c, v)?;
        }
        Ok(())
    }
}

/// A row returned by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Opaque internal id assigned by the store.
    pub id: String,
    /// All other columns.
    #[serde(flatten)]
    pub fields: JsonMap,
}

impl RemoteRecord {
    /// Decode a row from its JSON representation.
    ///
    /// The `id` column may be a string or a number; any other shape, or a
    /// non-object row, is a serialization error.
    pub fn from_json(value: JsonValue) -> Result<Self> {
        let JsonValue::Object(mut fields) = value else {
            return Err(Error::Serialization(
                "expected a JSON object for a store row".to_string(),
            ));
        };
        let id = match fields.remove("id") {
            Some(JsonValue::String(s)) => s,
            Some(JsonValue::Number(n)) => n.to_string(),
            _ => {
                return Err(Error::Serialization(
                    "store row has no usable id column".to_string(),
                ))
            }
        };
        Ok(Self { id, fields })
    }

    pub fn get(&self, column: &str) -> Option<&JsonValue> {
        self.fields.get(column)
    }

    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.fields.get(column).and_then(JsonValue::as_str)
    }

    /// Follow a path of object keys (e.g. `["metadata", "json_id"]`).
    ///
    /// Returns `None` as soon as a segment is missing or not an object, so
    /// rows with a non-object `metadata` simply never match.
    pub fn lookup(&self, path: &[&str]) -> Option<&JsonValue> {
        let (first, rest) = path.split_first()?;
        let mut current = self.fields.get(*first)?;
        for segment in rest {
            current = current.as_object()?.get(*segment)?;
        }
        Some(current)
    }
}

/// A record ready to be reconciled against the store.
///
/// `key` columns are written on create and never patched; `payload` holds
/// every mutable column.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertCandidate {
    pub kind: EntityKind,
    pub key: NaturalKey,
    pub payload: JsonMap,
    /// How the record is named in reports (natural key or source file).
    pub label: String,
}

impl UpsertCandidate {
    pub fn table(&self) -> &'static str {
        self.kind.table()
    }

    /// Key and payload merged, as sent on create.
    pub fn full_record(&self) -> JsonMap {
        let mut record = self.key.to_json_map();
        for (k, v) in &self.payload {
            record.insert(k.clone(), v.clone());
        }
        record
    }

    /// Payload value at a path of object keys.
    pub fn payload_lookup(&self, path: &[&str]) -> Option<&JsonValue> {
        let (first, rest) = path.split_first()?;
        let mut current = self.payload.get(*first)?;
        for segment in rest {
            current = current.as_object()?.get(*segment)?;
        }
        Some(current)
    }
}
