//! Polling watch service for backends without change notification

use super::{WatchEventKind, WatchEventKinds, WatchKey, WatchKeyOwner, WatchQueue, WatchService};
use crate::attributes::{BasicFileAttributes, PosixFileAttributes};
use crate::config::WatchConfig;
use crate::error::{ProviderError, Result};
use crate::path::ByteStringListPath;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

static NEXT_POLLER_ID: AtomicUsize = AtomicUsize::new(0);

type Snapshot = HashMap<ByteStringListPath, PosixFileAttributes>;

struct Poller {
    key: WatchKey,
    /// Dropping the sender wakes and stops the thread
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl Poller {
    /// Stop the thread and wait for it; `Err` when it panicked
    fn stop(self) -> std::result::Result<(), ()> {
        drop(self.stop);
        self.handle.join().map_err(|_| ())
    }
}

struct PollingInner {
    queue: Arc<WatchQueue>,
    pollers: Mutex<HashMap<ByteStringListPath, Poller>>,
    config: WatchConfig,
}

impl PollingInner {
    fn remove_poller(&self, key: &WatchKey) {
        let mut pollers = self.pollers.lock();
        if pollers.get(key.watchable()).map_or(false, |poller| poller.key == *key) {
            // Detached, the thread is exiting on its own
            pollers.remove(key.watchable());
        }
    }
}

impl WatchKeyOwner for PollingInner {
    fn cancel_key(&self, key: &WatchKey) {
        let poller = {
            let mut pollers = self.pollers.lock();
            match pollers.get(key.watchable()) {
                Some(poller) if poller.key == *key => pollers.remove(key.watchable()),
                _ => None,
            }
        };
        if let Some(poller) = poller {
            if poller.stop().is_err() {
                tracing::warn!("Poller for {} panicked", key.watchable());
            }
        }
    }
}

/// Watch service that diffs attribute snapshots on a fixed interval
pub struct PollingWatchService {
    inner: Arc<PollingInner>,
}

impl PollingWatchService {
    pub fn new(config: &WatchConfig) -> Self {
        Self {
            inner: Arc::new(PollingInner {
                queue: Arc::new(WatchQueue::new()),
                pollers: Mutex::new(HashMap::new()),
                config: config.clone(),
            }),
        }
    }

    fn spawn_poller(&self, key: WatchKey, snapshot: Snapshot) -> Result<Poller> {
        let (stop, stopped) = bounded::<()>(0);
        let service = Arc::downgrade(&self.inner);
        let config = self.inner.config.clone();
        let thread_key = key.clone();
        let handle = thread::Builder::new()
            .name(format!(
                "polling-watch-{}",
                NEXT_POLLER_ID.fetch_add(1, Ordering::Relaxed)
            ))
            .spawn(move || run_poller(thread_key, snapshot, stopped, service, config))?;
        Ok(Poller { key, stop, handle })
    }
}

fn run_poller(
    key: WatchKey,
    mut old_files: Snapshot,
    stopped: Receiver<()>,
    service: Weak<PollingInner>,
    config: WatchConfig,
) {
    let path = key.watchable().clone();
    let error = loop {
        match stopped.recv_timeout(config.poll_interval()) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                break ProviderError::interrupted(format!("poller for {} stopped", path));
            }
        }
        match snapshot(&path) {
            Ok(new_files) => {
                diff(&key, &old_files, &new_files, config.overflow_events);
                old_files = new_files;
            }
            Err(e) => break e,
        }
    };

    key.set_invalid();
    if error.is_interrupted() {
        tracing::debug!("Poller for {} exiting", path);
    } else {
        tracing::error!("Poller for {} failed: {}", path, error);
        key.signal();
    }
    if let Some(service) = service.upgrade() {
        service.remove_poller(&key);
    }
}

/// Attributes of the path itself, or of each child when it is a directory
///
/// Links are never followed; a child that vanishes mid-listing is skipped.
fn snapshot(path: &ByteStringListPath) -> Result<Snapshot> {
    let mut files = Snapshot::new();
    let attributes = path.read_attributes(false)?;
    if attributes.is_directory() {
        for child in path.list()? {
            match child.read_attributes(false) {
                Ok(attributes) => {
                    files.insert(child, attributes);
                }
                Err(e) => tracing::debug!("Skipping {} in snapshot: {}", child, e),
            }
        }
    } else {
        files.insert(path.clone(), attributes);
    }
    Ok(files)
}

fn diff(key: &WatchKey, old_files: &Snapshot, new_files: &Snapshot, overflow_events: bool) {
    if overflow_events {
        if old_files != new_files {
            key.add_event(WatchEventKind::Overflow, None);
        }
        return;
    }
    let kinds = key.kinds();
    for (path, old_attributes) in old_files {
        let kind = match new_files.get(path) {
            None => WatchEventKind::Delete,
            Some(new_attributes) if new_attributes != old_attributes => WatchEventKind::Modify,
            Some(_) => continue,
        };
        if kinds.contains(kind) {
            key.add_event(kind, Some(path.clone()));
        }
    }
    if kinds.contains(WatchEventKind::Create) {
        for path in new_files.keys() {
            if !old_files.contains_key(path) {
                key.add_event(WatchEventKind::Create, Some(path.clone()));
            }
        }
    }
}

impl WatchService for PollingWatchService {
    fn register(&self, path: &ByteStringListPath, kinds: &[WatchEventKind]) -> Result<WatchKey> {
        if self.inner.queue.is_closed() {
            return Err(ProviderError::ClosedWatchService);
        }
        let kinds = WatchEventKinds::from_kinds(kinds);
        let mut pollers = self.inner.pollers.lock();
        if let Some(poller) = pollers.get(path) {
            poller.key.set_kinds(kinds);
            return Ok(poller.key.clone());
        }
        let inner: Weak<PollingInner> = Arc::downgrade(&self.inner);
        let owner: Weak<dyn WatchKeyOwner> = inner;
        let key = WatchKey::new(path.clone(), kinds, self.inner.queue.clone(), owner);
        let initial = snapshot(path)?;
        let poller = self.spawn_poller(key.clone(), initial)?;
        pollers.insert(path.clone(), poller);
        tracing::debug!("Polling {} every {:?}", path, self.inner.config.poll_interval());
        Ok(key)
    }

    fn poll(&self) -> Result<Option<WatchKey>> {
        self.inner.queue.poll()
    }

    fn poll_timeout(&self, timeout: Duration) -> Result<Option<WatchKey>> {
        self.inner.queue.poll_timeout(timeout)
    }

    fn take(&self) -> Result<WatchKey> {
        self.inner.queue.take()
    }

    /// Stop every poller, collecting the ones that failed to join
    fn close(&self) -> Result<()> {
        if self.inner.queue.is_closed() {
            return Ok(());
        }
        // Joined outside the lock; an exiting poller takes it to deregister
        let pollers: Vec<Poller> = self.inner.pollers.lock().drain().map(|(_, poller)| poller).collect();
        self.inner.queue.close();
        let mut failure: Option<ProviderError> = None;
        for poller in pollers {
            poller.key.set_invalid();
            let path = poller.key.watchable().clone();
            if poller.stop().is_err() {
                let error = ProviderError::interrupted(format!("poller for {} panicked", path));
                failure = Some(match failure {
                    Some(first) => first.with_suppressed(error),
                    None => error,
                });
            }
        }
        tracing::debug!("Polling watch service closed");
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn is_open(&self) -> bool {
        !self.inner.queue.is_closed()
    }
}

impl Drop for PollingWatchService {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Failed to close polling watch service: {}", e);
        }
    }
}
