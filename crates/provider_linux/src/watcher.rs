//! OS change events via notify

use crate::error::LinuxProviderError;
use crate::file_system::host_path;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use provider_common::watch::{LocalWatchHub, NativeWatchSource};
use provider_common::{ByteStringListPath, FileSystem, Result};
use std::collections::HashMap;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

/// Feeds a [`LocalWatchHub`] with changes made outside this process
///
/// Directories are watched non-recursively and reference counted, so several
/// services may watch the same directory.
pub struct NativeWatcher {
    watcher: Mutex<RecommendedWatcher>,
    watched: Mutex<HashMap<PathBuf, usize>>,
}

impl NativeWatcher {
    pub fn new(file_system: Weak<dyn FileSystem>, hub: Weak<LocalWatchHub>) -> Result<Self> {
        let handler = move |result: notify::Result<Event>| match result {
            Ok(event) => {
                let (Some(file_system), Some(hub)) = (file_system.upgrade(), hub.upgrade()) else {
                    return;
                };
                dispatch(&file_system, &hub, event);
            }
            Err(e) => tracing::warn!("Watcher error: {:?}", e),
        };
        let watcher = RecommendedWatcher::new(handler, notify::Config::default()).map_err(|source| {
            LinuxProviderError::Watch {
                path: String::new(),
                source,
            }
        })?;
        Ok(Self {
            watcher: Mutex::new(watcher),
            watched: Mutex::new(HashMap::new()),
        })
    }

    pub fn watched_count(&self) -> usize {
        self.watched.lock().len()
    }
}

fn provider_path(file_system: &Arc<dyn FileSystem>, path: &Path) -> Option<ByteStringListPath> {
    match ByteStringListPath::parse(file_system, path.as_os_str().as_bytes()) {
        Ok(path) => Some(path),
        Err(e) => {
            tracing::debug!("Ignoring event for {}: {}", path.display(), e);
            None
        }
    }
}

fn dispatch(file_system: &Arc<dyn FileSystem>, hub: &LocalWatchHub, event: Event) {
    let paths: Vec<ByteStringListPath> = event
        .paths
        .iter()
        .filter_map(|path| provider_path(file_system, path))
        .collect();
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            paths.iter().for_each(|path| hub.on_entry_created(path));
        }
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.iter().for_each(|path| hub.on_entry_deleted(path));
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if let [from, to] = paths.as_slice() {
                hub.on_entry_deleted(from);
                hub.on_entry_created(to);
            }
        }
        EventKind::Modify(_) | EventKind::Any => {
            paths.iter().for_each(|path| hub.on_entry_modified(path));
        }
        EventKind::Access(_) | EventKind::Other => {}
    }
}

impl NativeWatchSource for NativeWatcher {
    fn watch(&self, path: &ByteStringListPath) -> Result<()> {
        let host = host_path(path)?;
        let mut watched = self.watched.lock();
        if let Some(count) = watched.get_mut(&host) {
            *count += 1;
            return Ok(());
        }
        self.watcher
            .lock()
            .watch(&host, RecursiveMode::NonRecursive)
            .map_err(|source| LinuxProviderError::Watch {
                path: path.to_string(),
                source,
            })?;
        watched.insert(host, 1);
        tracing::info!("Watching: {}", path);
        Ok(())
    }

    fn unwatch(&self, path: &ByteStringListPath) {
        let Ok(host) = host_path(path) else {
            return;
        };
        let mut watched = self.watched.lock();
        let Some(count) = watched.get_mut(&host) else {
            return;
        };
        *count -= 1;
        if *count > 0 {
            return;
        }
        watched.remove(&host);
        // Removing a vanished directory fails; the kernel dropped the watch already
        if let Err(e) = self.watcher.lock().unwatch(&host) {
            tracing::debug!("Unwatch {} failed: {:?}", path, e);
        }
        tracing::info!("Unwatched: {}", path);
    }
}
