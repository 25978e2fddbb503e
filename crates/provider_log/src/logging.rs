//! Subscriber setup with tracing

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "provider.log";

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Log directory, [`crate::log_dir`] when unset
    pub directory: Option<PathBuf>,
    /// Console output in release builds too, and `debug` as the default level
    pub verbose: bool,
}

impl LogOptions {
    pub fn directory(&self) -> PathBuf {
        self.directory.clone().unwrap_or_else(crate::log_dir)
    }

    fn default_filter(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}

/// Install the global subscriber
///
/// `RUST_LOG` overrides the default level.
pub fn init_logging(options: &LogOptions) -> anyhow::Result<()> {
    let log_dir = options.directory();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    // The writer flushes on drop; the process owns it until exit
    std::mem::forget(guard);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(options.default_filter()));
    let console = cfg!(debug_assertions) || options.verbose;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console.then(|| fmt::layer().pretty().with_writer(std::io::stderr)))
        .with(fmt::layer().json().with_writer(non_blocking))
        .try_init()?;

    tracing::info!("Logging to {}", log_dir.display());
    Ok(())
}

/// Delete rotated log files in `log_dir` older than `days`
pub fn cleanup_old_logs(log_dir: &Path, days: u32) -> anyhow::Result<usize> {
    if !log_dir.exists() {
        return Ok(0);
    }

    let threshold = SystemTime::now() - Duration::from_secs(u64::from(days) * 24 * 60 * 60);
    let mut deleted = 0;

    for entry in std::fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_log = path
            .file_name()
            .and_then(|name| name.to_str())
            .map_or(false, |name| name.starts_with(LOG_FILE_PREFIX));
        if !is_log {
            continue;
        }
        let modified = entry.metadata().and_then(|metadata| metadata.modified());
        if matches!(modified, Ok(modified) if modified < threshold) && std::fs::remove_file(&path).is_ok() {
            deleted += 1;
            tracing::debug!("Deleted old log: {:?}", path);
        }
    }

    tracing::info!("Cleaned up {} old log files", deleted);
    Ok(deleted)
}
