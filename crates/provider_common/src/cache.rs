//! Registry of live file system instances
//!
//! Entries stay until removed explicitly (a backend's close) or swept once
//! nothing outside the cache holds them.

use crate::error::Result;
use crate::file_system::FileSystem;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;

pub struct FileSystemCache<K, F: ?Sized = dyn FileSystem> {
    entries: DashMap<K, Arc<F>>,
}

impl<K: Eq + Hash + Clone, F: ?Sized> Default for FileSystemCache<K, F> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone, F: ?Sized> FileSystemCache<K, F> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached instance for `key`, creating it on first use
    ///
    /// `create` runs while the key's shard is locked, so concurrent callers
    /// never build two instances for one key.
    pub fn get_or_create(&self, key: K, create: impl FnOnce(&K) -> Result<Arc<F>>) -> Result<Arc<F>> {
        match self.entries.entry(key) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let file_system = create(entry.key())?;
                entry.insert(file_system.clone());
                Ok(file_system)
            }
        }
    }

    pub fn get(&self, key: &K) -> Option<Arc<F>> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, key: &K) -> Option<Arc<F>> {
        self.entries.remove(key).map(|(_, file_system)| file_system)
    }

    /// Drop entries only the cache still references; returns how many
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, file_system| Arc::strong_count(file_system) > 1);
        let swept = before.saturating_sub(self.entries.len());
        if swept > 0 {
            tracing::debug!("Swept {} unused file systems", swept);
        }
        swept
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;

    #[test]
    fn test_get_or_create_reuses_instance() {
        let cache: FileSystemCache<String, String> = FileSystemCache::new();
        let first = cache
            .get_or_create("a".into(), |key| Ok(Arc::new(key.to_uppercase())))
            .unwrap();
        let second = cache
            .get_or_create("a".into(), |_| Err(ProviderError::Unsupported("called twice".into())))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_failed_create_leaves_no_entry() {
        let cache: FileSystemCache<u32, String> = FileSystemCache::new();
        let result = cache.get_or_create(1, |_| Err(ProviderError::Unsupported("no".into())));
        assert!(result.is_err());
        assert!(cache.is_empty());
        assert!(cache.get(&1).is_none());
    }

    #[test]
    fn test_sweep_keeps_referenced_entries() {
        let cache: FileSystemCache<u32, String> = FileSystemCache::new();
        let held = cache.get_or_create(1, |_| Ok(Arc::new("held".into()))).unwrap();
        cache.get_or_create(2, |_| Ok(Arc::new("dropped".into()))).unwrap();
        assert_eq!(cache.sweep(), 1);
        assert!(cache.get(&1).is_some());
        assert!(cache.get(&2).is_none());
        drop(held);
        assert_eq!(cache.sweep(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_remove() {
        let cache: FileSystemCache<u32, String> = FileSystemCache::new();
        cache.get_or_create(7, |_| Ok(Arc::new("x".into()))).unwrap();
        assert!(cache.remove(&7).is_some());
        assert!(cache.remove(&7).is_none());
    }
}
