//! Directory observation with throttled callbacks
//!
//! - A poller thread blocks on the watch service and, for every key that
//!   carried events, asks each observer to run
//! - A notifier thread runs observers, at most once per interval each; a
//!   request inside the interval becomes a single trailing run

use crate::error::{ProviderError, Result};
use crate::path::ByteStringListPath;
use crate::watch::{WatchEventKind, WatchService};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

static NEXT_THREAD_ID: AtomicUsize = AtomicUsize::new(0);

const WATCHED_KINDS: [WatchEventKind; 3] = [
    WatchEventKind::Create,
    WatchEventKind::Delete,
    WatchEventKind::Modify,
];

pub type Observer = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

/// Something that tells observers when a path's contents change
pub trait PathObservable: Send + Sync {
    fn add_observer(&self, observer: Observer) -> Result<ObserverId>;
    fn remove_observer(&self, id: ObserverId) -> Result<()>;
    fn close(&self) -> Result<()>;
}

// ===== Throttling =====

struct ThrottleState {
    last_run: Option<Instant>,
    scheduled: bool,
    cancelled: bool,
}

/// Observer wrapper that runs at most once per interval
struct ThrottledCallback {
    callback: Observer,
    interval: Duration,
    state: Mutex<ThrottleState>,
}

impl ThrottledCallback {
    fn new(callback: Observer, interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            callback,
            interval,
            state: Mutex::new(ThrottleState {
                last_run: None,
                scheduled: false,
                cancelled: false,
            }),
        })
    }

    /// Schedule a run on the notifier unless one is already pending
    fn request(self: &Arc<Self>, notifier: &Sender<NotifierMessage>) {
        let mut state = self.state.lock();
        if state.cancelled || state.scheduled {
            return;
        }
        let now = Instant::now();
        let at = match state.last_run {
            Some(last_run) if now < last_run + self.interval => last_run + self.interval,
            _ => now,
        };
        state.scheduled = true;
        if notifier.send(NotifierMessage::Run(Scheduled { at, callback: self.clone() })).is_err() {
            state.scheduled = false;
        }
    }

    fn fire(&self) {
        {
            let mut state = self.state.lock();
            if state.cancelled {
                return;
            }
            state.scheduled = false;
            state.last_run = Some(Instant::now());
        }
        (self.callback)();
    }

    fn cancel(&self) {
        self.state.lock().cancelled = true;
    }
}

// ===== Notifier =====

struct Scheduled {
    at: Instant,
    callback: Arc<ThrottledCallback>,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    /// Reversed so the heap pops the earliest deadline
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.at.cmp(&self.at)
    }
}

enum NotifierMessage {
    Run(Scheduled),
    Quit,
}

fn run_notifier(messages: Receiver<NotifierMessage>) {
    let mut queue: BinaryHeap<Scheduled> = BinaryHeap::new();
    loop {
        let now = Instant::now();
        while queue.peek().map_or(false, |next| next.at <= now) {
            if let Some(due) = queue.pop() {
                due.callback.fire();
            }
        }
        let message = match queue.peek() {
            Some(next) => messages.recv_timeout(next.at.saturating_duration_since(Instant::now())),
            None => messages.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match message {
            Ok(NotifierMessage::Run(scheduled)) => queue.push(scheduled),
            Err(RecvTimeoutError::Timeout) => {}
            Ok(NotifierMessage::Quit) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    tracing::debug!("Observable notifier exiting");
}

// ===== Observable =====

struct ObserverState {
    observers: HashMap<ObserverId, Arc<ThrottledCallback>>,
    next_id: u64,
    closed: bool,
}

struct ObservableInner {
    path: ByteStringListPath,
    interval: Duration,
    watch_service: Box<dyn WatchService>,
    notifier: Sender<NotifierMessage>,
    state: Mutex<ObserverState>,
}

fn run_poller(inner: Arc<ObservableInner>) {
    loop {
        let key = match inner.watch_service.take() {
            Ok(key) => key,
            Err(ProviderError::ClosedWatchService) => break,
            Err(e) => {
                tracing::error!("Observing {} failed: {}", inner.path, e);
                break;
            }
        };
        if !key.poll_events().is_empty() {
            let state = inner.state.lock();
            for observer in state.observers.values() {
                observer.request(&inner.notifier);
            }
        }
        if !key.reset() {
            tracing::debug!("Watch key for {} is no longer valid", inner.path);
            break;
        }
    }
}

/// [`PathObservable`] backed by the path's own watch service
pub struct WatchServicePathObservable {
    inner: Arc<ObservableInner>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl WatchServicePathObservable {
    pub fn new(path: &ByteStringListPath, interval: Duration) -> Result<Self> {
        let watch_service = path.file_system().new_watch_service()?;
        if let Err(e) = watch_service.register(path, &WATCHED_KINDS) {
            return Err(match watch_service.close() {
                Ok(()) => e,
                Err(close_error) => e.with_suppressed(close_error),
            });
        }
        let (notifier, messages) = unbounded();
        let inner = Arc::new(ObservableInner {
            path: path.clone(),
            interval,
            watch_service,
            notifier,
            state: Mutex::new(ObserverState {
                observers: HashMap::new(),
                next_id: 0,
                closed: false,
            }),
        });
        let observable = Self {
            inner: inner.clone(),
            threads: Mutex::new(Vec::new()),
        };
        let id = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
        let notifier = thread::Builder::new()
            .name(format!("observable-notifier-{}", id))
            .spawn(move || run_notifier(messages))?;
        observable.threads.lock().push(notifier);
        let poller = thread::Builder::new()
            .name(format!("observable-poller-{}", id))
            .spawn(move || run_poller(inner))?;
        observable.threads.lock().push(poller);
        tracing::debug!("Observing {}", path);
        Ok(observable)
    }

    pub fn path(&self) -> &ByteStringListPath {
        &self.inner.path
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }
}

impl PathObservable for WatchServicePathObservable {
    fn add_observer(&self, observer: Observer) -> Result<ObserverId> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(ProviderError::ClosedObservable);
        }
        let id = ObserverId(state.next_id);
        state.next_id += 1;
        state
            .observers
            .insert(id, ThrottledCallback::new(observer, self.inner.interval));
        Ok(id)
    }

    fn remove_observer(&self, id: ObserverId) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(ProviderError::ClosedObservable);
        }
        if let Some(observer) = state.observers.remove(&id) {
            observer.cancel();
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let closed = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            for observer in state.observers.values() {
                observer.cancel();
            }
            state.observers.clear();
            // Quitting may fail if the notifier never started
            let _ = self.inner.notifier.send(NotifierMessage::Quit);
            self.inner.watch_service.close()
        };
        let threads: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
        for handle in threads {
            if handle.join().is_err() {
                tracing::warn!("Observer thread for {} panicked", self.inner.path);
            }
        }
        tracing::debug!("Stopped observing {}", self.inner.path);
        closed
    }
}

impl Drop for WatchServicePathObservable {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Failed to close observable for {}: {}", self.inner.path, e);
        }
    }
}

impl ByteStringListPath {
    /// Observe this directory, notifying at most once per `interval`
    pub fn observe(&self, interval: Duration) -> Result<WatchServicePathObservable> {
        WatchServicePathObservable::new(self, interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderConfig, WatchConfig};
    use crate::file_system::FileSystem;
    use crate::memory::MemoryFileSystem;
    use crate::path::FileSystemPaths;
    use crate::uri::UriAuthority;

    fn fast_fs() -> Arc<dyn FileSystem> {
        let config = ProviderConfig {
            watch: WatchConfig {
                overflow_events: false,
                poll_interval_ms: 20,
            },
            ..ProviderConfig::default()
        };
        MemoryFileSystem::with_config(UriAuthority::EMPTY, &config)
    }

    fn wait_until(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_observer_runs_on_change() {
        let fs = fast_fs();
        let dir = fs.path("/watched").unwrap();
        dir.create_directory().unwrap();
        let observable = dir.observe(Duration::from_millis(10)).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        observable
            .add_observer(Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        fs.path("/watched/new").unwrap().write_all_bytes(b"x").unwrap();
        assert!(wait_until(|| calls.load(Ordering::SeqCst) > 0));
        observable.close().unwrap();
    }

    #[test]
    fn test_throttled_to_one_run_per_interval() {
        let (notifier, messages) = unbounded();
        let handle = thread::spawn(move || run_notifier(messages));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let callback = ThrottledCallback::new(
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            Duration::from_millis(300),
        );
        callback.request(&notifier);
        assert!(wait_until(|| calls.load(Ordering::SeqCst) == 1));
        for _ in 0..10 {
            callback.request(&notifier);
        }
        thread::sleep(Duration::from_millis(100));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(wait_until(|| calls.load(Ordering::SeqCst) == 2));
        thread::sleep(Duration::from_millis(400));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        notifier.send(NotifierMessage::Quit).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_removed_observer_not_called() {
        let fs = fast_fs();
        let dir = fs.path("/d").unwrap();
        dir.create_directory().unwrap();
        let observable = dir.observe(Duration::from_millis(10)).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let id = observable
            .add_observer(Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        observable.remove_observer(id).unwrap();
        fs.path("/d/f").unwrap().write_all_bytes(b"x").unwrap();
        thread::sleep(Duration::from_millis(200));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_use_after_close() {
        let fs = fast_fs();
        let dir = fs.path("/c").unwrap();
        dir.create_directory().unwrap();
        let observable = dir.observe(Duration::from_millis(10)).unwrap();
        observable.close().unwrap();
        observable.close().unwrap();
        assert!(observable.is_closed());
        assert!(matches!(
            observable.add_observer(Arc::new(|| {})),
            Err(ProviderError::ClosedObservable)
        ));
        assert!(matches!(
            observable.remove_observer(ObserverId(0)),
            Err(ProviderError::ClosedObservable)
        ));
    }

    #[test]
    fn test_missing_directory_fails() {
        let fs = fast_fs();
        assert!(fs.path("/absent").unwrap().observe(Duration::from_millis(10)).is_err());
    }
}
