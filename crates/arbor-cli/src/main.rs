//! arbor-sync: reconcile a local workspace tree with the remote store.
//!
//! Exits non-zero only when the run cannot start (missing credentials,
//! unreadable root, bad env file). Per-record failures are logged and listed
//! in the printed summary.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use arbor_core::defaults;
use arbor_store::{RestStore, StoreConfig};
use arbor_sync::{detect_services, EntityCollector, Reconciler, RunSummary, SyncConfig};

const DEFAULT_LOG_FILTER: &str = "arbor_sync=info,arbor_store=info,arbor_cli=info";

#[derive(Parser, Debug)]
#[command(name = "arbor-sync")]
#[command(author, version, about = "Sync a workspace tree to the remote store")]
struct Cli {
    /// Root of the source tree (holds `workspaces/` and `.arbor/`)
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    /// Env file with store credentials (default: <root>/.arbor/.env.local)
    #[arg(short, long)]
    env_file: Option<PathBuf>,

    /// Records reconciled at once in key-constrained phases
    #[arg(short, long)]
    concurrency: Option<usize>,
}

impl Cli {
    fn env_file_path(&self) -> PathBuf {
        self.env_file.clone().unwrap_or_else(|| {
            self.root
                .join(defaults::TOOL_DIR)
                .join(defaults::ENV_FILE)
        })
    }
}

/// What happened to the env file, reported once logging is up.
#[derive(Debug, PartialEq, Eq)]
enum EnvFile {
    Loaded(PathBuf),
    Missing(PathBuf),
}

/// Load the env file into the process environment without overriding
/// variables that are already set. Only an explicitly named file must exist.
fn load_env_file(cli: &Cli) -> anyhow::Result<EnvFile> {
    let path = cli.env_file_path();
    if !path.is_file() {
        if cli.env_file.is_some() {
            anyhow::bail!("env file {} does not exist", path.display());
        }
        return Ok(EnvFile::Missing(path));
    }
    dotenvy::from_path(&path)
        .with_context(|| format!("failed to load env file {}", path.display()))?;
    Ok(EnvFile::Loaded(path))
}

/// Initialize tracing with configurable output.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, enables daily-rotated file logging)
///   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
///   RUST_LOG    - standard env filter (default: arbor crates at info)
fn init_tracing() -> Option<WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());

    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("arbor-sync.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            // No ANSI in files unless asked for.
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        // Logs go to stderr; stdout carries the summary.
        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stderr)"),
        "Logging initialized"
    );
    guard
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Before tracing, so LOG_* and RUST_LOG may come from the env file.
    let env_file = load_env_file(&cli);
    let _log_guard = init_tracing();

    match run(cli, env_file).await {
        Ok(summary) => {
            print!("{}", summary);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %format!("{:#}", e), "Sync aborted");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, env_file: anyhow::Result<EnvFile>) -> anyhow::Result<RunSummary> {
    match env_file? {
        EnvFile::Loaded(path) => info!(path = %path.display(), "Loaded env file"),
        EnvFile::Missing(path) => {
            warn!(path = %path.display(), "No env file found, using process environment")
        }
    }

    let store_config = StoreConfig::from_env().context("remote store is not configured")?;
    let store = RestStore::new(store_config)?;

    let mut sync_config = SyncConfig::from_env();
    if let Some(n) = cli.concurrency {
        sync_config = sync_config.with_max_concurrent(n);
    }

    let services = detect_services(|name| std::env::var(name).ok());
    for service in &services {
        info!(
            service = %service.name,
            configured = service.is_configured,
            "Detected service"
        );
    }

    let snapshot = EntityCollector::new(&cli.root)
        .collect(services)
        .context("failed to collect source tree")?;

    let summary = Reconciler::new(Arc::new(store), sync_config)
        .run(&snapshot)
        .await;

    if summary.has_failures() {
        warn!(
            failures = summary.failures.len(),
            "Sync finished with record failures"
        );
    }
    Ok(summary)
}
