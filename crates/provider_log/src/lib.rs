//! Logging and crash reporting for provider tools
//!
//! - JSON logs rotated daily under the data directory
//! - Console output on stderr in debug builds or when verbose
//! - Crash reports with a backtrace on panic
//! - Deadlock detection for `parking_lot` locks in debug builds

mod logging;
mod panic_hook;

pub use logging::{cleanup_old_logs, init_logging, LogOptions};
pub use panic_hook::{crash_report_path, init_panic_hook};

use directories::ProjectDirs;
use std::path::PathBuf;

/// Default log directory
pub fn log_dir() -> PathBuf {
    ProjectDirs::from("com", "ByteProvider", "ByteProvider")
        .map(|dirs| dirs.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("./logs"))
}

/// Install logging, the panic hook and, in debug builds, the deadlock detector
pub fn init(options: &LogOptions) -> anyhow::Result<()> {
    init_logging(options)?;
    init_panic_hook(options.directory());

    #[cfg(debug_assertions)]
    init_deadlock_detector();

    Ok(())
}

#[cfg(debug_assertions)]
fn init_deadlock_detector() {
    use std::thread;
    use std::time::Duration;

    let spawned = thread::Builder::new()
        .name("deadlock-detector".to_string())
        .spawn(|| loop {
            thread::sleep(Duration::from_secs(10));
            let deadlocks = parking_lot::deadlock::check_deadlock();
            if deadlocks.is_empty() {
                continue;
            }
            tracing::error!("{} deadlocks detected", deadlocks.len());
            for (i, threads) in deadlocks.iter().enumerate() {
                tracing::error!("Deadlock #{}", i);
                for t in threads {
                    tracing::error!("Thread Id {:#?}", t.thread_id());
                    tracing::error!("{:#?}", t.backtrace());
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!("Deadlock detector not started: {}", e);
    }
}
