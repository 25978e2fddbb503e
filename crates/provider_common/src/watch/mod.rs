//! Directory change notification
//!
//! - [`WatchKey`]: one registered path, its pending events and signal state
//! - [`WatchQueue`]: FIFO of signaled keys shared by a service and its keys
//! - [`LocalWatchService`]: events pushed by backend code through a [`LocalWatchHub`]
//! - [`PollingWatchService`]: one poller thread per path diffing attribute snapshots

mod key;
mod local;
mod polling;
mod queue;

pub use key::{WatchKey, WatchKeyOwner, MAX_PENDING_EVENTS};
pub use local::{LocalWatchHub, LocalWatchService, NativeWatchSource, NotifyingByteChannel};
pub use polling::PollingWatchService;
pub use queue::WatchQueue;

use crate::error::Result;
use crate::path::ByteStringListPath;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchEventKind {
    Create,
    Delete,
    Modify,
    /// Events were lost or collapsed; rescan
    Overflow,
}

/// Subscribed event kinds; `Overflow` is always delivered and never stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WatchEventKinds {
    pub create: bool,
    pub delete: bool,
    pub modify: bool,
}

impl WatchEventKinds {
    pub const ALL: WatchEventKinds = WatchEventKinds {
        create: true,
        delete: true,
        modify: true,
    };

    pub fn from_kinds(kinds: &[WatchEventKind]) -> Self {
        let mut set = Self::default();
        for kind in kinds {
            match kind {
                WatchEventKind::Create => set.create = true,
                WatchEventKind::Delete => set.delete = true,
                WatchEventKind::Modify => set.modify = true,
                WatchEventKind::Overflow => {}
            }
        }
        set
    }

    pub fn contains(&self, kind: WatchEventKind) -> bool {
        match kind {
            WatchEventKind::Create => self.create,
            WatchEventKind::Delete => self.delete,
            WatchEventKind::Modify => self.modify,
            WatchEventKind::Overflow => true,
        }
    }
}

/// A coalesced event: `count` consecutive occurrences of the same kind and context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    /// Path of the affected entry; `None` for overflow
    pub context: Option<ByteStringListPath>,
    pub count: u32,
}

pub trait WatchService: Send + Sync {
    /// Watch `path`; registering the same path again replaces its kinds and
    /// returns the existing key
    fn register(&self, path: &ByteStringListPath, kinds: &[WatchEventKind]) -> Result<WatchKey>;

    /// Next signaled key without blocking
    fn poll(&self) -> Result<Option<WatchKey>>;

    fn poll_timeout(&self, timeout: Duration) -> Result<Option<WatchKey>>;

    /// Block until a key is signaled; fails once the service is closed
    fn take(&self) -> Result<WatchKey>;

    fn close(&self) -> Result<()>;

    fn is_open(&self) -> bool;
}
