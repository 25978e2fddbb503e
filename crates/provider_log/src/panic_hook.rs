//! Crash reports on panic

use backtrace::Backtrace;
use chrono::{DateTime, Local};
use std::any::Any;
use std::panic::PanicHookInfo;
use std::path::{Path, PathBuf};

/// Install a panic hook writing crash reports into `directory`
pub fn init_panic_hook(directory: PathBuf) {
    std::panic::set_hook(Box::new(move |info| panic_handler(&directory, info)));
    tracing::debug!("Panic hook initialized");
}

pub fn crash_report_path(directory: &Path, at: DateTime<Local>) -> PathBuf {
    directory.join(format!("provider_crash_{}.txt", at.format("%Y%m%d_%H%M%S")))
}

fn payload_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "<unknown>"
    }
}

fn panic_handler(directory: &Path, info: &PanicHookInfo) {
    let backtrace = Backtrace::new();
    let thread = std::thread::current();
    let thread_name = thread.name().unwrap_or("<unnamed>");
    let now = Local::now();

    let report = format!(
        "=== PANIC ===\n\
         Timestamp: {}\n\
         Thread: {}\n\
         Location: {:?}\n\
         Payload: {}\n\n\
         Stack Trace:\n{:?}",
        now.to_rfc3339(),
        thread_name,
        info.location(),
        payload_message(info.payload()),
        backtrace
    );

    eprintln!("{}", report);
    tracing::error!("{}", report);

    let dump_path = crash_report_path(directory, now);
    if let Err(e) = std::fs::write(&dump_path, &report) {
        eprintln!("Failed to write crash report {}: {}", dump_path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_payload_message() {
        let borrowed: Box<dyn Any + Send> = Box::new("static");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let other: Box<dyn Any + Send> = Box::new(7u32);
        assert_eq!(payload_message(borrowed.as_ref()), "static");
        assert_eq!(payload_message(owned.as_ref()), "owned");
        assert_eq!(payload_message(other.as_ref()), "<unknown>");
    }

    #[test]
    fn test_crash_report_path() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            crash_report_path(Path::new("/logs"), at),
            PathBuf::from("/logs/provider_crash_20240309_140507.txt")
        );
    }
}
