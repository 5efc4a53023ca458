//! Structured logging setup with tracing

use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the logging system
///
/// JSON lines go to a daily file in `log_dir()`. Debug builds also print
/// human-readable output to stderr; stdout stays free for command output.
pub fn init_logging() -> anyhow::Result<()> {
    let log_dir = super::log_dir();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "qloud.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // The writer must outlive every log call, i.e. the whole process.
    std::mem::forget(guard);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(debug_assertions)]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .with(fmt::layer().json().with_writer(non_blocking))
            .try_init()?;
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(non_blocking))
            .try_init()?;
    }

    tracing::info!("Logging initialized in {:?}", log_dir);
    Ok(())
}

/// Clean up log files older than specified days
pub fn cleanup_old_logs(days: u32) -> anyhow::Result<usize> {
    cleanup_logs_in(&super::log_dir(), days)
}

/// Delete `*.log*` files in `log_dir` last modified more than `days` ago
pub fn cleanup_logs_in(log_dir: &Path, days: u32) -> anyhow::Result<usize> {
    if !log_dir.exists() {
        return Ok(0);
    }

    let age = Duration::from_secs(u64::from(days) * 24 * 60 * 60);
    let threshold = SystemTime::now().checked_sub(age).unwrap_or(SystemTime::UNIX_EPOCH);
    let mut deleted = 0;

    for entry in std::fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();

        // Daily rotation names files `qloud.log.YYYY-MM-DD`
        let is_log = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.contains(".log"));
        if !is_log {
            continue;
        }

        let modified = entry.metadata().and_then(|m| m.modified());
        if matches!(modified, Ok(time) if time < threshold) && std::fs::remove_file(&path).is_ok() {
            deleted += 1;
            tracing::debug!("Deleted old log: {:?}", path);
        }
    }

    tracing::info!("Cleaned up {} old log files", deleted);
    Ok(deleted)
}
