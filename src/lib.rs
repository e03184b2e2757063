pub mod adapters;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod session;
pub mod telemetry;

pub use crate::adapters::{ProviderClient, ReplyStream};
pub use crate::config::AppConfig;
pub use crate::db::Database;
pub use crate::errors::{AppError, AppResult};
pub use crate::session::{Controller, Session};
pub use crate::telemetry::Telemetry;

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Installs the global JSON subscriber writing to a daily rolling file under
/// `log_dir`. `RUST_LOG` overrides the default `info` filter.
pub fn init_tracing(log_dir: &Path) -> AppResult<()> {
    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "ollama-connect.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| AppError::Internal(error.to_string()))
}
