//! Memo of expensive classifier inputs derived from the match graph.
//!
//! Entries may depend on the current match state, so the whole cache is
//! cleared by every graph mutation. There is no other eviction.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::model::{ClassId, FieldId, MethodId, VarId};

/// Keys are always (side A entity, side B entity).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    MethodCode(MethodId, MethodId),
    FieldInitCode(FieldId, FieldId),
    VarUsage(VarId, VarId),
    MembersFull(ClassId, ClassId),
}

#[derive(Debug, Default)]
pub struct ResultCache {
    entries: DashMap<CacheKey, f64>,
    clears: AtomicU64,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached value for `key`, computing and storing it on a
    /// miss. Concurrent misses may compute the value more than once.
    pub fn get_or_compute(&self, key: CacheKey, compute: impl FnOnce() -> f64) -> f64 {
        if let Some(hit) = self.entries.get(&key) {
            return *hit;
        }
        let value = compute();
        self.entries.insert(key, value);
        value
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn clear(&self) {
        self.entries.clear();
        self.clears.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of invalidations so far.
    pub fn clear_count(&self) -> u64 {
        self.clears.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn computes_once_until_cleared() {
        let cache = ResultCache::new();
        let calls = Cell::new(0);
        let key = CacheKey::MethodCode(MethodId(1), MethodId(2));
        let compute = || {
            calls.set(calls.get() + 1);
            0.5
        };

        assert_eq!(cache.get_or_compute(key, compute), 0.5);
        assert_eq!(cache.get_or_compute(key, compute), 0.5);
        assert_eq!(calls.get(), 1);
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.clear_count(), 1);
        cache.get_or_compute(key, compute);
        assert_eq!(calls.get(), 2);
    }
}
