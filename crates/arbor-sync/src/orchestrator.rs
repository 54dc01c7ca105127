//! Phase-ordered reconciliation of a local snapshot against the store.
//!
//! A run walks [`PHASES`] in order. Each phase builds candidates for one
//! entity kind, looking up parent ids in the [`SyncSession`] filled by the
//! phases before it, and resolves them through the kind's identity
//! strategy. Failures stay inside the record that caused them: they are
//! logged, counted and listed in the [`RunSummary`], and the record's
//! children are skipped in later phases.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, instrument, warn};

use arbor_core::defaults;
use arbor_core::{
    EntityKind, Error, IdentityRule, LocalSnapshot, NaturalKey, RemoteStore, UpsertCandidate,
};

use crate::records;
use crate::resolver::{strategy_for, Outcome};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Configuration for a reconciliation run.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Records resolved at once within a key-constrained phase. Records
    /// sharing a natural key are still resolved in local order.
    pub max_concurrent: usize,
    /// Timestamp written to every `synced_at` / `last_checked` of the run.
    /// `None` uses the time the run starts.
    pub run_timestamp: Option<DateTime<Utc>>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent: defaults::SYNC_MAX_CONCURRENT,
            run_timestamp: None,
        }
    }
}

impl SyncConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `ARBOR_MAX_CONCURRENT` | `1` | Records in flight per key-constrained phase |
    pub fn from_env() -> Self {
        let max_concurrent = std::env::var("ARBOR_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::SYNC_MAX_CONCURRENT)
            .max(1);

        Self {
            max_concurrent,
            ..Default::default()
        }
    }

    /// Set the per-phase concurrency (at least 1).
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    /// Pin the run timestamp.
    pub fn with_run_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.run_timestamp = Some(ts);
        self
    }
}

// =============================================================================
// PHASES
// =============================================================================

/// Session entries a phase needs before its records can be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheRead {
    None,
    Workspace,
    WorkspaceAndProject,
}

/// One step of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phase {
    pub kind: EntityKind,
    pub reads: CacheRead,
}

/// Reconciliation order. A phase only reads session entries written by the
/// phases above it.
pub const PHASES: [Phase; 5] = [
    Phase {
        kind: EntityKind::Workspace,
        reads: CacheRead::None,
    },
    Phase {
        kind: EntityKind::Project,
        reads: CacheRead::Workspace,
    },
    Phase {
        kind: EntityKind::Document,
        reads: CacheRead::WorkspaceAndProject,
    },
    Phase {
        kind: EntityKind::Stakeholder,
        reads: CacheRead::Workspace,
    },
    Phase {
        kind: EntityKind::UserServiceConfig,
        reads: CacheRead::None,
    },
];

// =============================================================================
// SESSION
// =============================================================================

/// Remote ids resolved so far in this run, keyed by natural key.
#[derive(Debug, Default)]
pub struct SyncSession {
    workspaces: HashMap<String, String>,
    projects: HashMap<(String, String), String>,
}

/// Session entry a resolved record fills.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CacheSlot {
    None,
    Workspace(String),
    Project(String, String),
}

/// Parent ids looked up for a record. Fields a phase does not read stay empty.
#[derive(Debug, Default)]
struct Parents {
    workspace_id: String,
    project_id: String,
}

impl SyncSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn workspace_id(&self, workspace_code: &str) -> Option<&str> {
        self.workspaces.get(workspace_code).map(String::as_str)
    }

    pub fn project_id(&self, workspace_code: &str, project_code: &str) -> Option<&str> {
        self.projects
            .get(&(workspace_code.to_string(), project_code.to_string()))
            .map(String::as_str)
    }

    pub fn workspace_count(&self) -> usize {
        self.workspaces.len()
    }

    pub fn project_count(&self) -> usize {
        self.projects.len()
    }

    fn remember(&mut self, slot: CacheSlot, id: &str) {
        match slot {
            CacheSlot::None => {}
            CacheSlot::Workspace(code) => {
                self.workspaces.insert(code, id.to_string());
            }
            CacheSlot::Project(workspace_code, code) => {
                self.projects.insert((workspace_code, code), id.to_string());
            }
        }
    }

    /// Parent ids per `reads`, or a description of the first one missing.
    fn parents(
        &self,
        reads: CacheRead,
        workspace_code: &str,
        project_code: &str,
    ) -> std::result::Result<Parents, String> {
        let mut parents = Parents::default();
        if reads == CacheRead::None {
            return Ok(parents);
        }

        parents.workspace_id = self
            .workspace_id(workspace_code)
            .ok_or_else(|| format!("workspace {} was not resolved", workspace_code))?
            .to_string();

        if reads == CacheRead::WorkspaceAndProject {
            parents.project_id = self
                .project_id(workspace_code, project_code)
                .ok_or_else(|| {
                    format!("project {}/{} was not resolved", workspace_code, project_code)
                })?
                .to_string();
        }
        Ok(parents)
    }
}

// =============================================================================
// SUMMARY
// =============================================================================

/// Counters for one entity kind. `attempted == succeeded + failed`;
/// skipped records are never attempted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub created: usize,
    pub updated: usize,
}

/// A record that could not be reconciled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    pub kind: EntityKind,
    /// Natural key or source file naming the record.
    pub key: String,
    /// Error class, see `Error::kind`.
    pub error_kind: &'static str,
    pub message: String,
}

/// Outcome of a run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_timestamp: DateTime<Utc>,
    kinds: BTreeMap<EntityKind, KindSummary>,
    pub failures: Vec<RecordFailure>,
}

impl RunSummary {
    pub fn new(run_timestamp: DateTime<Utc>) -> Self {
        Self {
            run_timestamp,
            kinds: EntityKind::ALL
                .iter()
                .map(|k| (*k, KindSummary::default()))
                .collect(),
            failures: Vec::new(),
        }
    }

    /// Counters for a kind.
    pub fn kind(&self, kind: EntityKind) -> KindSummary {
        self.kinds.get(&kind).copied().unwrap_or_default()
    }

    /// Counters summed over all kinds.
    pub fn totals(&self) -> KindSummary {
        self.kinds
            .values()
            .fold(KindSummary::default(), |mut acc, k| {
                acc.attempted += k.attempted;
                acc.succeeded += k.succeeded;
                acc.failed += k.failed;
                acc.skipped += k.skipped;
                acc.created += k.created;
                acc.updated += k.updated;
                acc
            })
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    fn entry(&mut self, kind: EntityKind) -> &mut KindSummary {
        self.kinds.entry(kind).or_default()
    }

    fn record_success(&mut self, kind: EntityKind, outcome: Outcome) {
        let entry = self.entry(kind);
        entry.attempted += 1;
        entry.succeeded += 1;
        match outcome {
            Outcome::Created => entry.created += 1,
            Outcome::Updated => entry.updated += 1,
        }
    }

    fn record_failure(&mut self, kind: EntityKind, key: &str, err: &Error) {
        let entry = self.entry(kind);
        entry.attempted += 1;
        entry.failed += 1;
        self.failures.push(RecordFailure {
            kind,
            key: key.to_string(),
            error_kind: err.kind(),
            message: err.to_string(),
        });
    }

    fn record_skip(&mut self, kind: EntityKind) {
        self.entry(kind).skipped += 1;
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Sync run at {}", self.run_timestamp.to_rfc3339())?;
        for (kind, s) in &self.kinds {
            writeln!(
                f,
                "  {:<20} attempted {:>4}  ok {:>4} (created {}, updated {})  failed {:>3}  skipped {:>3}",
                kind.table(),
                s.attempted,
                s.succeeded,
                s.created,
                s.updated,
                s.failed,
                s.skipped
            )?;
        }
        if !self.failures.is_empty() {
            writeln!(f, "Failures:")?;
            for failure in &self.failures {
                writeln!(
                    f,
                    "  [{}] {} ({}): {}",
                    failure.kind, failure.key, failure.error_kind, failure.message
                )?;
            }
        }
        Ok(())
    }
}

// =============================================================================
// RECONCILER
// =============================================================================

/// What a phase does with one local item.
enum Planned {
    Ready {
        candidate: UpsertCandidate,
        slot: CacheSlot,
    },
    Skipped {
        label: String,
        reason: String,
    },
    Invalid {
        label: String,
        error: Error,
    },
}

/// Drives a run against a remote store.
pub struct Reconciler {
    store: Arc<dyn RemoteStore>,
    config: SyncConfig,
}

impl Reconciler {
    pub fn new(store: Arc<dyn RemoteStore>, config: SyncConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Reconcile a snapshot. Never fails as a whole: every per-record error
    /// ends up in the returned summary.
    #[instrument(skip(self, snapshot), fields(subsystem = "sync"))]
    pub async fn run(&self, snapshot: &LocalSnapshot) -> RunSummary {
        let run_timestamp = self.config.run_timestamp.unwrap_or_else(Utc::now);
        let stamp = records::format_timestamp(&run_timestamp);
        let started = Instant::now();

        info!(
            run_timestamp = %stamp,
            max_concurrent = self.config.max_concurrent,
            "Starting sync run"
        );

        let mut session = SyncSession::new();
        let mut summary = RunSummary::new(run_timestamp);

        for phase in &PHASES {
            let phase_started = Instant::now();
            info!(
                phase = phase.kind.table(),
                record_count = snapshot.count(phase.kind),
                "Starting phase"
            );

            let planned = self.plan(phase, snapshot, &session, &stamp);
            self.execute(phase, planned, &mut session, &mut summary).await;

            let s = summary.kind(phase.kind);
            info!(
                phase = phase.kind.table(),
                succeeded = s.succeeded,
                failed = s.failed,
                skipped = s.skipped,
                duration_ms = phase_started.elapsed().as_millis() as u64,
                "Phase complete"
            );
        }

        let totals = summary.totals();
        info!(
            succeeded = totals.succeeded,
            failed = totals.failed,
            skipped = totals.skipped,
            created = totals.created,
            updated = totals.updated,
            duration_ms = started.elapsed().as_millis() as u64,
            "Sync run complete"
        );
        summary
    }

    /// Build the candidates of one phase from the snapshot and the session.
    fn plan(
        &self,
        phase: &Phase,
        snapshot: &LocalSnapshot,
        session: &SyncSession,
        stamp: &str,
    ) -> Vec<Planned> {
        let reads = phase.reads;
        let mut planned: Vec<Planned> = match phase.kind {
            EntityKind::Workspace => snapshot
                .workspaces
                .iter()
                .map(|ws| Planned::Ready {
                    candidate: records::workspace_candidate(ws),
                    slot: CacheSlot::Workspace(ws.code.clone()),
                })
                .collect(),

            EntityKind::Project => snapshot
                .projects
                .iter()
                .map(|p| match session.parents(reads, &p.workspace_code, &p.code) {
                    Ok(parents) => Planned::Ready {
                        candidate: records::project_candidate(p, &parents.workspace_id),
                        slot: CacheSlot::Project(p.workspace_code.clone(), p.code.clone()),
                    },
                    Err(reason) => Planned::Skipped {
                        label: format!("{}/{}", p.workspace_code, p.code),
                        reason,
                    },
                })
                .collect(),

            EntityKind::Document => snapshot
                .documents
                .iter()
                .map(|d| {
                    match session.parents(reads, &d.workspace_code, &d.project_code) {
                        Ok(parents) => Planned::Ready {
                            candidate: records::document_candidate(
                                d,
                                &parents.workspace_id,
                                &parents.project_id,
                                stamp,
                            ),
                            slot: CacheSlot::None,
                        },
                        Err(reason) => Planned::Skipped {
                            label: d.rel_path.to_string_lossy().into_owned(),
                            reason,
                        },
                    }
                })
                .collect(),

            EntityKind::Stakeholder => snapshot
                .stakeholders
                .iter()
                .map(|s| {
                    let label = s.rel_path.to_string_lossy().into_owned();
                    match session.parents(reads, &s.workspace_code, "") {
                        Ok(parents) => {
                            match records::stakeholder_candidate(s, &parents.workspace_id, stamp) {
                                Ok(candidate) => Planned::Ready {
                                    candidate,
                                    slot: CacheSlot::None,
                                },
                                Err(error) => Planned::Invalid { label, error },
                            }
                        }
                        Err(reason) => Planned::Skipped { label, reason },
                    }
                })
                .collect(),

            EntityKind::UserServiceConfig => snapshot
                .users
                .iter()
                .flat_map(|user| {
                    snapshot.services.iter().map(move |service| Planned::Ready {
                        candidate: records::service_config_candidate(user, service, stamp),
                        slot: CacheSlot::None,
                    })
                })
                .collect(),
        };

        planned.extend(snapshot.unreadable_of(phase.kind).map(|u| Planned::Invalid {
            label: u.rel_path.to_string_lossy().into_owned(),
            error: Error::Io(std::io::Error::other(u.reason.clone())),
        }));
        planned
    }

    /// Resolve a phase's candidates and record every outcome.
    async fn execute(
        &self,
        phase: &Phase,
        planned: Vec<Planned>,
        session: &mut SyncSession,
        summary: &mut RunSummary,
    ) {
        let kind = phase.kind;
        let rule = kind.identity_rule();
        let mut ready = Vec::new();

        for item in planned {
            match item {
                Planned::Ready { candidate, slot } => ready.push((candidate, slot)),
                Planned::Skipped { label, reason } => {
                    warn!(
                        entity_kind = kind.as_str(),
                        db_table = kind.table(),
                        natural_key = %label,
                        reason = %reason,
                        "Skipping record: parent not resolved in this run"
                    );
                    summary.record_skip(kind);
                }
                Planned::Invalid { label, error } => {
                    report_failure(kind, &label, &error, summary);
                }
            }
        }

        // Scan-matched kinds are check-then-act on their parent; keep them
        // strictly sequential.
        let concurrency = match rule {
            IdentityRule::ScanMatch { .. } => 1,
            IdentityRule::KeyConstraint => self.config.max_concurrent.max(1),
        };
        let strategy = strategy_for(rule);
        let strategy = strategy.as_ref();
        let store: &dyn RemoteStore = self.store.as_ref();

        let mut results = stream::iter(group_by_key(ready))
            .map(|group| async move {
                let mut resolved = Vec::with_capacity(group.len());
                for (candidate, slot) in group {
                    let result = strategy.resolve(store, &candidate).await;
                    resolved.push((candidate, slot, result));
                }
                resolved
            })
            .buffer_unordered(concurrency)
            .flat_map(stream::iter);

        while let Some((candidate, slot, result)) = results.next().await {
            match result {
                Ok(resolution) => {
                    debug!(
                        entity_kind = kind.as_str(),
                        natural_key = %candidate.label,
                        record_id = %resolution.record.id,
                        outcome = ?resolution.outcome,
                        "Record reconciled"
                    );
                    session.remember(slot, &resolution.record.id);
                    summary.record_success(kind, resolution.outcome);
                }
                Err(e) => report_failure(kind, &candidate.label, &e, summary),
            }
        }
    }
}

/// Split candidates into groups sharing a natural key, in first-seen order.
///
/// Groups run concurrently; the members of a group run one after another in
/// local order, so the last local record with a key is the one left behind.
fn group_by_key(
    ready: Vec<(UpsertCandidate, CacheSlot)>,
) -> Vec<Vec<(UpsertCandidate, CacheSlot)>> {
    let mut index: HashMap<NaturalKey, usize> = HashMap::new();
    let mut groups: Vec<Vec<(UpsertCandidate, CacheSlot)>> = Vec::new();
    for (candidate, slot) in ready {
        match index.get(&candidate.key) {
            Some(&i) => groups[i].push((candidate, slot)),
            None => {
                index.insert(candidate.key.clone(), groups.len());
                groups.push(vec![(candidate, slot)]);
            }
        }
    }
    groups
}

fn report_failure(kind: EntityKind, label: &str, err: &Error, summary: &mut RunSummary) {
    error!(
        entity_kind = kind.as_str(),
        db_table = kind.table(),
        natural_key = %label,
        error_kind = err.kind(),
        error = %err,
        "Record failed to reconcile"
    );
    summary.record_failure(kind, label, err);
}
