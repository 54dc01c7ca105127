//! Centralized default constants for arbor.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers or directory names.

// =============================================================================
// REMOTE STORE
// =============================================================================

/// Path prefix of the PostgREST surface under the store URL.
pub const REST_PATH: &str = "/rest/v1";

/// Per-request timeout for remote store calls (seconds).
pub const STORE_TIMEOUT_SECS: u64 = 30;

/// Retries for transient transport failures on idempotent calls.
pub const STORE_MAX_RETRIES: u32 = 2;

/// Initial backoff between retries (milliseconds), doubled on each attempt.
pub const STORE_RETRY_BACKOFF_MS: u64 = 250;

/// Page size used when listing all children of a parent.
pub const STORE_PAGE_SIZE: usize = 1000;

// =============================================================================
// RECONCILIATION
// =============================================================================

/// Records resolved at once within a constraint-keyed phase (1 = sequential).
pub const SYNC_MAX_CONCURRENT: usize = 1;

/// Value written to `metadata.source` on every synced record.
pub const SYNC_SOURCE: &str = "arbor-sync";

/// Maximum characters of a workspace README used as its description.
pub const WORKSPACE_DESCRIPTION_CHARS: usize = 200;

// =============================================================================
// LOCAL LAYOUT
// =============================================================================

/// Directory under the root holding one directory per workspace.
pub const WORKSPACES_DIR: &str = "workspaces";

/// Workspace directory that is a scaffold, never synced.
pub const TEMPLATE_WORKSPACE: &str = "template";

/// Directory of active projects inside a workspace.
pub const ACTIVE_PROJECTS_DIR: &str = "active-projects";

/// Directory of archived projects inside a workspace.
pub const ARCHIVED_PROJECTS_DIR: &str = "archived-projects";

/// Stakeholder payload directory, relative to a workspace.
pub const STAKEHOLDERS_DIR: [&str; 2] = ["stakeholders", "fichas-json"];

/// Optional workspace style configuration file.
pub const STYLE_CONFIG_FILE: &str = "config-estilo.json";

/// Optional workspace readme, feeding the description.
pub const README_FILE: &str = "README.md";

/// Tool directory under the root (users, env file).
pub const TOOL_DIR: &str = ".arbor";

/// User profiles directory inside the tool directory.
pub const USERS_DIR: &str = "users";

/// Profile file inside each user directory.
pub const PROFILE_FILE: &str = "profile.json";

/// Env file inside the tool directory.
pub const ENV_FILE: &str = ".env.local";

// =============================================================================
// SERVICES
// =============================================================================

/// Fixed service table: (service key, display name, marker variable).
///
/// A service counts as configured when its marker variable holds a
/// non-empty value.
pub const SERVICES: [(&str, &str, &str); 4] = [
    ("google_workspace", "Google Workspace", "GOOGLE_WORKSPACE_CLIENT_ID"),
    ("openai", "OpenAI", "OPENAI_API_KEY"),
    ("supabase", "Supabase", "SUPABASE_URL"),
    ("reddit", "Reddit", "REDDIT_CLIENT_ID"),
];
