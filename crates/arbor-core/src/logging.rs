//! Structured logging field name constants for arbor.
//!
//! All crates use these constants for consistent structured logging fields,
//! so a run's log can be filtered by entity kind, table or natural key.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | A record failed to reconcile; operator should fix the source |
//! | WARN  | Record skipped, or a local file was unreadable and ignored |
//! | INFO  | Run and phase lifecycle, run summary |
//! | DEBUG | Decision points (conflict fallback, scan match), request retries |
//! | TRACE | Per-record iteration, scan comparisons |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "collector", "store", "sync", "cli"
pub const SUBSYSTEM: &str = "subsystem";

/// Reconciliation phase name.
pub const PHASE: &str = "phase";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Entity kind being reconciled ("workspace", "project", ...).
pub const ENTITY_KIND: &str = "entity_kind";

/// Remote table affected.
pub const DB_TABLE: &str = "db_table";

/// Human-readable natural key of the record.
pub const NATURAL_KEY: &str = "natural_key";

/// Opaque remote id of the record.
pub const RECORD_ID: &str = "record_id";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of records handled.
pub const RECORD_COUNT: &str = "record_count";

/// Retry attempt number.
pub const ATTEMPT: &str = "attempt";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Error class (see `Error::kind`).
pub const ERROR_KIND: &str = "error_kind";
