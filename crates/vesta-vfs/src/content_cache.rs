use std::sync::Arc;

use lru::LruCache;
use vesta_core::RecordId;

/// File contents keyed by record, bounded by a byte budget.
///
/// When inserting would exceed the budget, least-recently-used entries are evicted until the
/// total fits again. A budget of 0 disables caching.
#[derive(Debug)]
pub(crate) struct ContentCache {
    max_bytes: usize,
    total_bytes: usize,
    lru: LruCache<RecordId, Arc<[u8]>>,
}

impl ContentCache {
    pub(crate) fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            total_bytes: 0,
            lru: LruCache::unbounded(),
        }
    }

    pub(crate) fn insert(&mut self, id: RecordId, bytes: Arc<[u8]>) {
        let len = bytes.len();
        if self.max_bytes == 0 || len > self.max_bytes {
            self.remove(id);
            return;
        }

        if let Some(prev) = self.lru.put(id, bytes) {
            self.total_bytes = self.total_bytes.saturating_sub(prev.len());
        }
        self.total_bytes = self.total_bytes.saturating_add(len);

        while self.total_bytes > self.max_bytes {
            let Some((_, evicted)) = self.lru.pop_lru() else {
                self.total_bytes = 0;
                break;
            };
            self.total_bytes = self.total_bytes.saturating_sub(evicted.len());
        }
    }

    pub(crate) fn get(&mut self, id: RecordId) -> Option<Arc<[u8]>> {
        self.lru.get(&id).cloned()
    }

    pub(crate) fn remove(&mut self, id: RecordId) {
        if let Some(prev) = self.lru.pop(&id) {
            self.total_bytes = self.total_bytes.saturating_sub(prev.len());
        }
    }

    pub(crate) fn total_bytes(&self) -> usize {
        self.total_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u32) -> RecordId {
        RecordId::from_raw(raw)
    }

    #[test]
    fn evicts_least_recently_used_over_budget() {
        let mut cache = ContentCache::new(8);
        cache.insert(id(2), Arc::from(&b"aaaa"[..]));
        cache.insert(id(3), Arc::from(&b"bbbb"[..]));
        assert!(cache.get(id(2)).is_some());

        cache.insert(id(4), Arc::from(&b"cccc"[..]));
        assert!(cache.get(id(3)).is_none());
        assert!(cache.get(id(2)).is_some());
        assert_eq!(cache.total_bytes(), 8);
    }

    #[test]
    fn oversized_entries_are_not_cached() {
        let mut cache = ContentCache::new(4);
        cache.insert(id(2), Arc::from(&b"ab"[..]));
        cache.insert(id(2), Arc::from(&b"too long"[..]));
        assert!(cache.get(id(2)).is_none());
        assert_eq!(cache.total_bytes(), 0);

        let mut disabled = ContentCache::new(0);
        disabled.insert(id(2), Arc::from(&b""[..]));
        assert!(disabled.get(id(2)).is_none());
    }
}
