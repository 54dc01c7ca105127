//! # arbor-sync
//!
//! Reconciles a local workspace tree with the remote store.
//!
//! A run has two halves:
//!
//! 1. [`EntityCollector`] walks the source root and produces a
//!    [`LocalSnapshot`](arbor_core::LocalSnapshot).
//! 2. [`Reconciler`] upserts the snapshot phase by phase (workspaces,
//!    projects, documents, stakeholders, user service configs), resolving
//!    each record's remote identity with the strategy its kind declares.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use arbor_store::RestStore;
//! use arbor_sync::{detect_services, EntityCollector, Reconciler, SyncConfig};
//!
//! let services = detect_services(|name| std::env::var(name).ok());
//! let snapshot = EntityCollector::new("/srv/tree").collect(services)?;
//! let reconciler = Reconciler::new(Arc::new(RestStore::from_env()?), SyncConfig::from_env());
//! let summary = reconciler.run(&snapshot).await;
//! println!("{}", summary);
//! ```

pub mod collector;
pub mod orchestrator;
pub mod records;
pub mod resolver;

pub use collector::{detect_services, EntityCollector};
pub use orchestrator::{
    CacheRead, KindSummary, Phase, Reconciler, RecordFailure, RunSummary, SyncConfig,
    SyncSession, PHASES,
};
pub use resolver::{
    strategy_for, IdentityStrategy, KeyConstraintStrategy, Outcome, Resolution,
    ScanMatchStrategy,
};
