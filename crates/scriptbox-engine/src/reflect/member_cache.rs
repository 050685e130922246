//! Name-keyed member caches
//!
//! One cache per member kind per type. An entry remembers whether it was
//! resolved as a static or an instance member; a hit with the other
//! static-ness falls through to a fresh lookup and never overwrites the
//! existing entry, so static and instance results cannot leak into each
//! other.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

struct CacheEntry<D> {
    descriptor: Arc<D>,
    is_static: bool,
}

/// Cache of resolved member descriptors
pub struct MemberCache<D> {
    entries: RwLock<FxHashMap<String, CacheEntry<D>>>,
}

impl<D> Default for MemberCache<D> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(FxHashMap::default()),
        }
    }
}

impl<D> std::fmt::Debug for MemberCache<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemberCache")
            .field("len", &self.len())
            .finish()
    }
}

impl<D> MemberCache<D> {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached descriptor, or the result of `lookup`
    ///
    /// `lookup` must only return members whose static-ness equals
    /// `is_static`.
    pub fn find_or_insert_with(
        &self,
        name: &str,
        is_static: bool,
        lookup: impl FnOnce() -> Option<Arc<D>>,
    ) -> Option<Arc<D>> {
        if let Some(entry) = self.entries.read().get(name) {
            if entry.is_static == is_static {
                return Some(entry.descriptor.clone());
            }
        }

        let descriptor = lookup()?;
        self.entries
            .write()
            .entry(name.to_string())
            .or_insert_with(|| CacheEntry {
                descriptor: descriptor.clone(),
                is_static,
            });
        Some(descriptor)
    }

    /// Whether `name` has an entry, and with which static-ness
    pub fn cached(&self, name: &str) -> Option<bool> {
        self.entries.read().get(name).map(|e| e.is_static)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing has been cached yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_hit_skips_lookup() {
        let cache: MemberCache<&'static str> = MemberCache::new();
        let calls = Cell::new(0);
        let lookup = || {
            calls.set(calls.get() + 1);
            Some(Arc::new("instance x"))
        };
        assert_eq!(cache.find_or_insert_with("x", false, lookup).as_deref(), Some(&"instance x"));
        assert_eq!(cache.find_or_insert_with("x", false, lookup).as_deref(), Some(&"instance x"));
        assert_eq!(calls.get(), 1);
        assert_eq!(cache.cached("x"), Some(false));
    }

    #[test]
    fn test_static_mismatch_does_fresh_lookup_without_overwrite() {
        let cache: MemberCache<&'static str> = MemberCache::new();
        cache.find_or_insert_with("x", false, || Some(Arc::new("instance x")));

        let found = cache.find_or_insert_with("x", true, || Some(Arc::new("static x")));
        assert_eq!(found.as_deref(), Some(&"static x"));
        // first resolution keeps the slot
        assert_eq!(cache.cached("x"), Some(false));
        assert_eq!(
            cache.find_or_insert_with("x", false, || None).as_deref(),
            Some(&"instance x")
        );
    }

    #[test]
    fn test_miss_is_not_cached() {
        let cache: MemberCache<u32> = MemberCache::new();
        assert!(cache.find_or_insert_with("missing", false, || None).is_none());
        assert!(cache.is_empty());
    }
}
