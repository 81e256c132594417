//! Logging setup for Coalescer using tracing.
//!
//! Queue decisions (dispatch, retry, eviction) log under `coalescer`,
//! HTTP request spans under `tower_http`. `RUST_LOG` overrides both.

use anyhow::Result;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,coalescer=debug,tower_http=debug";

/// Overrides the platform log directory.
const LOG_DIR_ENV: &str = "COALESCER_LOG_DIR";

/// Initialize logging with file appender and console output.
///
/// Keep the returned guard alive; dropping it flushes and closes the file.
pub fn init() -> Result<(WorkerGuard, PathBuf)> {
    let log_dir = resolve_log_dir(std::env::var_os(LOG_DIR_ENV).map(PathBuf::from))?;
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "coalescer.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true);

    // Consumer and server share one process; stderr stays terse.
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter())
        .with(file_layer)
        .with(console_layer)
        .try_init()?;

    tracing::info!("Logging to {}", log_dir.display());

    Ok((guard, log_dir))
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

fn resolve_log_dir(overridden: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = overridden.filter(|d| !d.as_os_str().is_empty()) {
        return Ok(dir);
    }

    let dirs = directories::ProjectDirs::from("com", "coalescer", "coalescer")
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
    Ok(dirs.data_dir().join("logs"))
}

/// Test subscriber writing through the test harness. Only the first call
/// installs it.
#[cfg(test)]
pub fn init_test() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_test_writer())
        .try_init();
}
