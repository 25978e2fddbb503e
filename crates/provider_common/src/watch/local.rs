//! Push-based watching
//!
//! Backend code reports its own mutations (and native OS events) to a
//! [`LocalWatchHub`], which fans them out to every open [`LocalWatchService`].

use super::{WatchEventKind, WatchEventKinds, WatchKey, WatchKeyOwner, WatchQueue, WatchService};
use crate::channel::SeekableByteChannel;
use crate::config::WatchConfig;
use crate::error::{ProviderError, Result};
use crate::path::ByteStringListPath;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Source of OS-level change events for watched directories
pub trait NativeWatchSource: Send + Sync {
    fn watch(&self, path: &ByteStringListPath) -> Result<()>;
    fn unwatch(&self, path: &ByteStringListPath);
}

/// Dispatches entry events to the live services of one backend
#[derive(Default)]
pub struct LocalWatchHub {
    services: Mutex<Vec<Weak<LocalInner>>>,
    native: OnceCell<Arc<dyn NativeWatchSource>>,
}

impl LocalWatchHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Install the native event source; only the first call has an effect
    pub fn set_native_source(&self, source: Arc<dyn NativeWatchSource>) -> bool {
        self.native.set(source).is_ok()
    }

    fn native(&self) -> Option<&Arc<dyn NativeWatchSource>> {
        self.native.get()
    }

    pub fn on_entry_created(&self, path: &ByteStringListPath) {
        self.dispatch(path, WatchEventKind::Create);
    }

    pub fn on_entry_deleted(&self, path: &ByteStringListPath) {
        self.dispatch(path, WatchEventKind::Delete);
    }

    pub fn on_entry_modified(&self, path: &ByteStringListPath) {
        self.dispatch(path, WatchEventKind::Modify);
    }

    pub fn service_count(&self) -> usize {
        self.live_services().len()
    }

    fn dispatch(&self, path: &ByteStringListPath, kind: WatchEventKind) {
        for service in self.live_services() {
            service.on_event(path, kind);
        }
    }

    fn live_services(&self) -> Vec<Arc<LocalInner>> {
        let mut services = self.services.lock();
        services.retain(|service| service.strong_count() > 0);
        services.iter().filter_map(Weak::upgrade).collect()
    }

    fn add(&self, service: Weak<LocalInner>) {
        self.services.lock().push(service);
    }

    fn remove(&self, service: &Arc<LocalInner>) {
        self.services
            .lock()
            .retain(|candidate| !std::ptr::eq(candidate.as_ptr(), Arc::as_ptr(service)));
    }
}

fn absolute(path: &ByteStringListPath) -> Option<ByteStringListPath> {
    path.to_absolute_path().ok().map(|path| path.normalize())
}

struct LocalInner {
    hub: Arc<LocalWatchHub>,
    queue: Arc<WatchQueue>,
    keys: Mutex<HashMap<ByteStringListPath, WatchKey>>,
    config: WatchConfig,
}

impl LocalInner {
    fn on_event(&self, path: &ByteStringListPath, kind: WatchEventKind) {
        if self.queue.is_closed() {
            return;
        }
        // Events and registrations may mix relative and absolute spellings
        let Some(target) = absolute(path) else {
            return;
        };
        let parent = target.parent();
        let keys = self.keys.lock();
        for (watched, key) in keys.iter() {
            let watched = absolute(watched);
            if watched.as_ref() != Some(&target) && watched != parent {
                continue;
            }
            if self.config.overflow_events {
                key.add_event(WatchEventKind::Overflow, None);
                continue;
            }
            if key.kinds().contains(kind) {
                key.add_event(kind, Some(path.clone()));
            }
        }
    }
}

impl WatchKeyOwner for LocalInner {
    fn cancel_key(&self, key: &WatchKey) {
        let removed = self.keys.lock().remove(key.watchable());
        if removed.is_some() {
            if let Some(native) = self.hub.native() {
                native.unwatch(key.watchable());
            }
        }
    }
}

/// Watch service fed by [`LocalWatchHub`] events
pub struct LocalWatchService {
    inner: Arc<LocalInner>,
}

impl LocalWatchService {
    pub fn new(hub: &Arc<LocalWatchHub>, config: &WatchConfig) -> Self {
        let inner = Arc::new(LocalInner {
            hub: hub.clone(),
            queue: Arc::new(WatchQueue::new()),
            keys: Mutex::new(HashMap::new()),
            config: config.clone(),
        });
        hub.add(Arc::downgrade(&inner));
        tracing::debug!("Local watch service created");
        Self { inner }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.queue.is_closed() {
            Err(ProviderError::ClosedWatchService)
        } else {
            Ok(())
        }
    }
}

impl WatchService for LocalWatchService {
    fn register(&self, path: &ByteStringListPath, kinds: &[WatchEventKind]) -> Result<WatchKey> {
        self.ensure_open()?;
        let kinds = WatchEventKinds::from_kinds(kinds);
        if let Some(key) = self.inner.keys.lock().get(path) {
            key.set_kinds(kinds);
            return Ok(key.clone());
        }
        // Native events take the key lock, so watch outside it
        let native = self.inner.hub.native();
        if let Some(native) = native {
            native.watch(path)?;
        }
        let mut keys = self.inner.keys.lock();
        if let Some(key) = keys.get(path).cloned() {
            // Lost a race with another register of the same path
            drop(keys);
            if let Some(native) = native {
                native.unwatch(path);
            }
            key.set_kinds(kinds);
            return Ok(key);
        }
        let inner: Weak<LocalInner> = Arc::downgrade(&self.inner);
        let owner: Weak<dyn WatchKeyOwner> = inner;
        let key = WatchKey::new(path.clone(), kinds, self.inner.queue.clone(), owner);
        keys.insert(path.clone(), key.clone());
        tracing::debug!("Watching {}", path);
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

    fn close(&self) -> Result<()> {
        if self.inner.queue.is_closed() {
            return Ok(());
        }
        let keys: Vec<WatchKey> = self.inner.keys.lock().drain().map(|(_, key)| key).collect();
        for key in &keys {
            key.set_invalid();
            if let Some(native) = self.inner.hub.native() {
                native.unwatch(key.watchable());
            }
        }
        self.inner.hub.remove(&self.inner);
        self.inner.queue.close();
        tracing::debug!("Local watch service closed");
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.inner.queue.is_closed()
    }
}

impl Drop for LocalWatchService {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Failed to close watch service: {}", e);
        }
    }
}

/// Reports modifications made through a channel to the hub
pub struct NotifyingByteChannel {
    inner: Box<dyn SeekableByteChannel>,
    path: ByteStringListPath,
    hub: Arc<LocalWatchHub>,
}

impl NotifyingByteChannel {
    pub fn new(inner: Box<dyn SeekableByteChannel>, path: ByteStringListPath, hub: Arc<LocalWatchHub>) -> Self {
        Self { inner, path, hub }
    }
}

impl SeekableByteChannel for NotifyingByteChannel {
    fn read(&self, dst: &mut [u8]) -> Result<usize> {
        self.inner.read(dst)
    }

    fn write(&self, src: &[u8]) -> Result<usize> {
        let written = self.inner.write(src)?;
        self.hub.on_entry_modified(&self.path);
        Ok(written)
    }

    fn position(&self) -> Result<u64> {
        self.inner.position()
    }

    fn set_position(&self, position: u64) -> Result<()> {
        self.inner.set_position(position)
    }

    fn size(&self) -> Result<u64> {
        self.inner.size()
    }

    fn truncate(&self, size: u64) -> Result<()> {
        self.inner.truncate(size)?;
        self.hub.on_entry_modified(&self.path);
        Ok(())
    }

    fn force(&self, metadata: bool) -> Result<()> {
        self.inner.force(metadata)
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn close(&self) -> Result<()> {
        if !self.inner.is_open() {
            return Ok(());
        }
        self.inner.close()?;
        self.hub.on_entry_modified(&self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_system::FileSystem;
    use crate::memory::MemoryFileSystem;
    use crate::path::FileSystemPaths;

    fn setup(overflow_events: bool) -> (Arc<LocalWatchHub>, LocalWatchService, Arc<dyn FileSystem>) {
        let hub = LocalWatchHub::new();
        let config = WatchConfig {
            overflow_events,
            ..WatchConfig::default()
        };
        let service = LocalWatchService::new(&hub, &config);
        let fs: Arc<dyn FileSystem> = MemoryFileSystem::new();
        (hub, service, fs)
    }

    #[test]
    fn test_child_event_reaches_parent_key() {
        let (hub, service, fs) = setup(false);
        let dir = fs.path("/dir").unwrap();
        let key = service.register(&dir, &[WatchEventKind::Create]).unwrap();

        let child = fs.path("/dir/file").unwrap();
        hub.on_entry_created(&child);
        hub.on_entry_created(&fs.path("/dir/sub/deep").unwrap());

        let taken = service.poll().unwrap().unwrap();
        assert_eq!(taken, key);
        let events = taken.poll_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].context, Some(child));
    }

    #[test]
    fn test_kind_filter_and_reregister() {
        let (hub, service, fs) = setup(false);
        let dir = fs.path("/dir").unwrap();
        let key = service.register(&dir, &[WatchEventKind::Create]).unwrap();
        hub.on_entry_deleted(&fs.path("/dir/a").unwrap());
        assert!(service.poll().unwrap().is_none());

        let again = service.register(&dir, &[WatchEventKind::Delete, WatchEventKind::Overflow]).unwrap();
        assert_eq!(again, key);
        hub.on_entry_deleted(&fs.path("/dir/a").unwrap());
        assert_eq!(service.poll().unwrap(), Some(key));
    }

    #[test]
    fn test_overflow_mode_ignores_kinds() {
        let (hub, service, fs) = setup(true);
        let dir = fs.path("/dir").unwrap();
        let key = service.register(&dir, &[WatchEventKind::Create]).unwrap();
        hub.on_entry_modified(&dir);
        hub.on_entry_deleted(&fs.path("/dir/x").unwrap());
        let events = key.poll_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, WatchEventKind::Overflow);
        assert_eq!(events[0].count, 2);
    }

    #[test]
    fn test_cancel_and_close() {
        let (hub, service, fs) = setup(false);
        let key = service.register(&fs.path("/dir").unwrap(), &[WatchEventKind::Create]).unwrap();
        key.cancel();
        assert!(!key.is_valid());
        hub.on_entry_created(&fs.path("/dir/a").unwrap());
        assert!(service.poll().unwrap().is_none());

        assert_eq!(hub.service_count(), 1);
        service.close().unwrap();
        assert_eq!(hub.service_count(), 0);
        assert!(matches!(service.take(), Err(ProviderError::ClosedWatchService)));
        assert!(matches!(service.poll(), Err(ProviderError::ClosedWatchService)));
        assert!(service.register(&fs.path("/dir").unwrap(), &[]).is_err());
    }

    #[test]
    fn test_close_wakes_blocked_take() {
        let (_hub, service, _fs) = setup(false);
        let service = Arc::new(service);
        let waiter = {
            let service = service.clone();
            std::thread::spawn(move || service.take())
        };
        std::thread::sleep(Duration::from_millis(50));
        service.close().unwrap();
        let result = waiter.join().unwrap();
        assert!(matches!(result, Err(ProviderError::ClosedWatchService)));
    }
}
