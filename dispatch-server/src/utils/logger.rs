//! Logging Infrastructure
//!
//! Structured logging setup with support for both development and production
//! environments.
//!
//! ```text
//! <log_dir>/
//! ├── app/dispatch-server.YYYY-MM-DD   # daily, pruned after 14 days
//! ├── ledger/ledger.log                # target "ledger", kept forever
//! └── security/security.log            # target "security", kept forever
//! ```
//!
//! `RUST_LOG` overrides the configured level for the console and app file;
//! the ledger and security files always receive their whole target.

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

/// Days an application log file is kept
pub const APP_LOG_RETENTION_DAYS: u64 = 14;

const APP_LOG_PREFIX: &str = "dispatch-server";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Flush handles for the file writers. Dropping them loses buffered lines,
/// so the binary holds them until exit.
#[must_use]
pub struct LoggerGuards {
    _guards: Vec<WorkerGuard>,
}

/// Initialize console-only logging
pub fn init_logger(log_level: &str, json: bool) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(vec![console_layer(log_level, json)])
        .try_init()?;
    Ok(())
}

/// Initialize the logger with console output plus the app, ledger and
/// security files under `log_dir`
pub fn init_logger_with_file(
    log_level: &str,
    json: bool,
    log_dir: &Path,
) -> anyhow::Result<LoggerGuards> {
    let app_dir = log_dir.join("app");
    let ledger_dir = log_dir.join("ledger");
    let security_dir = log_dir.join("security");
    for dir in [&app_dir, &ledger_dir, &security_dir] {
        fs::create_dir_all(dir)?;
    }

    let (app_writer, app_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&app_dir, APP_LOG_PREFIX));
    let (ledger_writer, ledger_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(&ledger_dir, "ledger.log"));
    let (security_writer, security_guard) = tracing_appender::non_blocking(
        tracing_appender::rolling::never(&security_dir, "security.log"),
    );

    let app_layer = fmt::layer()
        .json()
        .with_ansi(false)
        .with_writer(app_writer)
        .with_filter(env_filter(log_level))
        .boxed();
    let ledger_layer = fmt::layer()
        .json()
        .with_ansi(false)
        .with_writer(ledger_writer)
        .with_filter(filter_fn(|meta| meta.target() == "ledger"))
        .boxed();
    let security_layer = fmt::layer()
        .json()
        .with_ansi(false)
        .with_writer(security_writer)
        .with_filter(filter_fn(|meta| meta.target() == "security"))
        .boxed();

    tracing_subscriber::registry()
        .with(vec![
            console_layer(log_level, json),
            app_layer,
            ledger_layer,
            security_layer,
        ])
        .try_init()?;

    Ok(LoggerGuards {
        _guards: vec![app_guard, ledger_guard, security_guard],
    })
}

fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
}

fn console_layer(log_level: &str, json: bool) -> BoxedLayer {
    if json {
        fmt::layer()
            .json()
            .with_target(true)
            .with_filter(env_filter(log_level))
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_line_number(false)
            .with_filter(env_filter(log_level))
            .boxed()
    }
}

/// Delete application log files older than `days`.
///
/// Only `<log_dir>/app` is pruned. Returns the number of deleted files.
pub fn cleanup_old_logs(log_dir: &Path, days: u64) -> std::io::Result<usize> {
    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(days.saturating_mul(86_400)))
        .unwrap_or(SystemTime::UNIX_EPOCH);
    remove_modified_before(&log_dir.join("app"), cutoff)
}

fn remove_modified_before(dir: &Path, cutoff: SystemTime) -> std::io::Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_file() || !entry.file_name().to_string_lossy().starts_with(APP_LOG_PREFIX) {
            continue;
        }
        if metadata.modified()? < cutoff {
            fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    if removed > 0 {
        tracing::info!(dir = %dir.display(), removed, "Old log files removed");
    }
    Ok(removed)
}
