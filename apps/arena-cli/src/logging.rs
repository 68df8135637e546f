//! Tracing setup and log retention.
//!
//! Human-readable logs always go to stderr. With `--log-dir`, every run also
//! writes JSON logs to `<log-dir>/<command>-<YYYYMMDD_HHMMSS>.log`, and files
//! older than [`LOG_RETENTION_DAYS`] are pruned before the run starts.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Age after which log files are deleted.
const LOG_RETENTION_DAYS: u64 = 7;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must live until
/// the program exits.
///
/// # Errors
///
/// Returns an error if the log file cannot be created.
pub fn init_tracing(log_dir: Option<&Path>, command: &str) -> Result<Option<WorkerGuard>> {
    let stderr = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_default_env());

    let Some(log_dir) = log_dir else {
        tracing_subscriber::registry().with(stderr).init();
        return Ok(None);
    };

    let (writer, guard) = open_log_writer(log_dir, command)?;
    tracing_subscriber::registry()
        .with(stderr)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(EnvFilter::from_default_env()),
        )
        .init();
    Ok(Some(guard))
}

fn open_log_writer(log_dir: &Path, command: &str) -> Result<(NonBlocking, WorkerGuard)> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory: {}", log_dir.display()))?;

    let path = log_file_path(log_dir, command, SystemTime::now());
    let file = fs::File::create(&path)
        .with_context(|| format!("failed to create log file: {}", path.display()))?;

    Ok(tracing_appender::non_blocking(file))
}

fn log_file_path(log_dir: &Path, command: &str, now: SystemTime) -> PathBuf {
    log_dir.join(format!("{command}-{}.log", utc_timestamp(now)))
}

/// Delete `.log` files in `log_dir` last modified before the retention
/// window. Best effort: runs before tracing is up, so problems go to stderr.
pub fn prune_old_logs(log_dir: &Path) {
    let Ok(entries) = fs::read_dir(log_dir) else {
        return;
    };
    let cutoff = SystemTime::now() - Duration::from_secs(LOG_RETENTION_DAYS * SECS_PER_DAY);

    for path in entries.filter_map(|entry| entry.ok().map(|e| e.path())) {
        if !path.is_file() || path.extension().and_then(|ext| ext.to_str()) != Some("log") {
            continue;
        }
        let expired = fs::metadata(&path)
            .and_then(|meta| meta.modified())
            .is_ok_and(|modified| modified < cutoff);
        if expired && let Err(e) = fs::remove_file(&path) {
            eprintln!("warning: could not remove old log {}: {e}", path.display());
        }
    }
}

/// `YYYYMMDD_HHMMSS` in UTC.
fn utc_timestamp(time: SystemTime) -> String {
    let secs = time
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let (year, month, day) = civil_date(secs / SECS_PER_DAY);
    let rem = secs % SECS_PER_DAY;
    format!(
        "{year:04}{month:02}{day:02}_{:02}{:02}{:02}",
        rem / 3600,
        rem % 3600 / 60,
        rem % 60
    )
}

/// Gregorian date of a day count since 1970-01-01 (Hinnant's
/// `civil_from_days`, restricted to non-negative input).
fn civil_date(days: u64) -> (u64, u64, u64) {
    let shifted = days + 719_468;
    let era = shifted / 146_097;
    let day_of_era = shifted % 146_097;
    let year_of_era =
        (day_of_era - day_of_era / 1460 + day_of_era / 36_524 - day_of_era / 146_096) / 365;
    let day_of_year = day_of_era - (365 * year_of_era + year_of_era / 4 - year_of_era / 100);
    let month_index = (5 * day_of_year + 2) / 153;
    let day = day_of_year - (153 * month_index + 2) / 5 + 1;
    let month = if month_index < 10 {
        month_index + 3
    } else {
        month_index - 9
    };
    let year = era * 400 + year_of_era + u64::from(month <= 2);
    (year, month, day)
}
