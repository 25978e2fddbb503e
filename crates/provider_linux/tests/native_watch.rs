use provider_common::{
    ByteString, FileSystem, FileSystemPaths, PathObservable, ProviderConfig, WatchEventKind, WatchService,
};
use provider_linux::LocalFileSystem;
use std::os::unix::ffi::OsStrExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn setup() -> (tempfile::TempDir, Arc<dyn FileSystem>) {
    let dir = tempfile::tempdir().unwrap();
    let root = ByteString::from_bytes(dir.path().as_os_str().as_bytes());
    let fs: Arc<dyn FileSystem> = LocalFileSystem::with_default_directory(root, &ProviderConfig::default());
    (dir, fs)
}

fn wait_for(service: &dyn WatchService, kind: WatchEventKind, name: &str) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        let Some(key) = service.poll_timeout(Duration::from_millis(100)).unwrap() else {
            continue;
        };
        let found = key.poll_events().iter().any(|event| {
            event.kind == kind
                && event
                    .context
                    .as_ref()
                    .and_then(|path| path.file_name_bytes())
                    .map_or(false, |file_name| file_name == name)
        });
        key.reset();
        if found {
            return true;
        }
    }
    false
}

#[test]
fn test_external_changes_are_reported() {
    let (dir, fs) = setup();
    let service = fs.new_watch_service().unwrap();
    service
        .register(
            &fs.path(".").unwrap(),
            &[WatchEventKind::Create, WatchEventKind::Delete],
        )
        .unwrap();

    std::fs::write(dir.path().join("outside.txt"), b"written by another process").unwrap();
    assert!(wait_for(service.as_ref(), WatchEventKind::Create, "outside.txt"));

    std::fs::remove_file(dir.path().join("outside.txt")).unwrap();
    assert!(wait_for(service.as_ref(), WatchEventKind::Delete, "outside.txt"));
    service.close().unwrap();
}

#[test]
fn test_observer_sees_directory_changes() {
    let (dir, fs) = setup();
    let observable = fs.path(".").unwrap().observe(Duration::from_millis(10)).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    observable
        .add_observer(Arc::new(move || {
            counted.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

    std::fs::write(dir.path().join("a"), b"").unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while calls.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(calls.load(Ordering::SeqCst) > 0);
    observable.close().unwrap();
}
