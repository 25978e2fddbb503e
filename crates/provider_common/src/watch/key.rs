use super::{WatchEvent, WatchEventKind, WatchEventKinds, WatchQueue};
use crate::path::ByteStringListPath;
use parking_lot::Mutex;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

/// Pending events kept per key before collapsing into a single overflow
pub const MAX_PENDING_EVENTS: usize = 256;

/// The service side of a key, told when the key is cancelled
pub trait WatchKeyOwner: Send + Sync {
    fn cancel_key(&self, key: &WatchKey);
}

/// Registration of one path with one watch service
///
/// Clones share state; equality is identity.
#[derive(Clone)]
pub struct WatchKey {
    inner: Arc<KeyInner>,
}

struct KeyInner {
    path: ByteStringListPath,
    queue: Arc<WatchQueue>,
    owner: Weak<dyn WatchKeyOwner>,
    state: Mutex<KeyState>,
}

struct KeyState {
    valid: bool,
    signaled: bool,
    kinds: WatchEventKinds,
    events: Vec<WatchEvent>,
}

impl WatchKey {
    pub fn new(
        path: ByteStringListPath,
        kinds: WatchEventKinds,
        queue: Arc<WatchQueue>,
        owner: Weak<dyn WatchKeyOwner>,
    ) -> Self {
        Self {
            inner: Arc::new(KeyInner {
                path,
                queue,
                owner,
                state: Mutex::new(KeyState {
                    valid: true,
                    signaled: false,
                    kinds,
                    events: Vec::new(),
                }),
            }),
        }
    }

    /// The watched path
    pub fn watchable(&self) -> &ByteStringListPath {
        &self.inner.path
    }

    pub fn kinds(&self) -> WatchEventKinds {
        self.inner.state.lock().kinds
    }

    pub fn set_kinds(&self, kinds: WatchEventKinds) {
        self.inner.state.lock().kinds = kinds;
    }

    /// Record an event and signal the key
    ///
    /// Repeats of the last event only bump its count, and a pending overflow
    /// absorbs everything until the events are polled.
    pub fn add_event(&self, kind: WatchEventKind, context: Option<ByteStringListPath>) {
        let mut state = self.inner.state.lock();
        if let Some(last) = state.events.last_mut() {
            if last.kind == WatchEventKind::Overflow || (last.kind == kind && last.context == context) {
                last.count = last.count.saturating_add(1);
                return;
            }
        }
        if kind == WatchEventKind::Overflow || state.events.len() >= MAX_PENDING_EVENTS {
            state.events.clear();
            state.events.push(WatchEvent {
                kind: WatchEventKind::Overflow,
                context: None,
                count: 1,
            });
        } else {
            state.events.push(WatchEvent {
                kind,
                context,
                count: 1,
            });
        }
        self.signal_locked(&mut state);
    }

    /// Queue the key for delivery unless it already is
    pub fn signal(&self) {
        let mut state = self.inner.state.lock();
        self.signal_locked(&mut state);
    }

    fn signal_locked(&self, state: &mut KeyState) {
        if !state.signaled {
            state.signaled = true;
            self.inner.queue.enqueue(self.clone());
        }
    }

    /// Take all pending events
    pub fn poll_events(&self) -> Vec<WatchEvent> {
        std::mem::take(&mut self.inner.state.lock().events)
    }

    /// Re-arm after processing; `false` once the key is invalid
    ///
    /// A key that gathered events while being processed goes straight back
    /// into the queue.
    pub fn reset(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.valid && state.signaled {
            if state.events.is_empty() {
                state.signaled = false;
            } else {
                self.inner.queue.enqueue(self.clone());
            }
        }
        state.valid
    }

    pub fn is_valid(&self) -> bool {
        self.inner.state.lock().valid
    }

    pub fn is_signaled(&self) -> bool {
        self.inner.state.lock().signaled
    }

    pub fn set_invalid(&self) {
        self.inner.state.lock().valid = false;
    }

    /// Stop watching; the owning service drops the registration
    pub fn cancel(&self) {
        if !self.is_valid() {
            return;
        }
        if let Some(owner) = self.inner.owner.upgrade() {
            owner.cancel_key(self);
        }
        self.set_invalid();
    }
}

impl PartialEq for WatchKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for WatchKey {}

impl Hash for WatchKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.inner) as usize).hash(state);
    }
}

impl fmt::Debug for WatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchKey")
            .field("path", &self.inner.path)
            .field("valid", &self.is_valid())
            .finish()
    }
}
