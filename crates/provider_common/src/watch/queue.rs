use super::WatchKey;
use crate::error::{ProviderError, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

enum Entry {
    Key(WatchKey),
    /// Stays at the head forever once pushed
    Closed,
}

/// Blocking FIFO of signaled keys
#[derive(Default)]
pub struct WatchQueue {
    entries: Mutex<VecDeque<Entry>>,
    available: Condvar,
}

impl WatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, key: WatchKey) {
        let mut entries = self.entries.lock();
        if matches!(entries.front(), Some(Entry::Closed)) {
            return;
        }
        entries.push_back(Entry::Key(key));
        self.available.notify_one();
    }

    /// Wake every waiter with `ClosedWatchService`, now and forever after
    pub fn close(&self) {
        let mut entries = self.entries.lock();
        entries.clear();
        entries.push_back(Entry::Closed);
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.entries.lock().front(), Some(Entry::Closed))
    }

    pub fn poll(&self) -> Result<Option<WatchKey>> {
        let mut entries = self.entries.lock();
        Self::pop(&mut entries)
    }

    pub fn poll_timeout(&self, timeout: Duration) -> Result<Option<WatchKey>> {
        let deadline = Instant::now() + timeout;
        let mut entries = self.entries.lock();
        loop {
            if let Some(key) = Self::pop(&mut entries)? {
                return Ok(Some(key));
            }
            if self.available.wait_until(&mut entries, deadline).timed_out() {
                return Self::pop(&mut entries);
            }
        }
    }

    pub fn take(&self) -> Result<WatchKey> {
        let mut entries = self.entries.lock();
        loop {
            if let Some(key) = Self::pop(&mut entries)? {
                return Ok(key);
            }
            self.available.wait(&mut entries);
        }
    }

    fn pop(entries: &mut VecDeque<Entry>) -> Result<Option<WatchKey>> {
        match entries.front() {
            None => Ok(None),
            Some(Entry::Closed) => Err(ProviderError::ClosedWatchService),
            Some(Entry::Key(_)) => match entries.pop_front() {
                Some(Entry::Key(key)) => Ok(Some(key)),
                _ => Ok(None),
            },
        }
    }
}
