//! Page-count cache
//!
//! Counting pages means downloading and parsing the whole PDF, so the result
//! is remembered per document for a limited time. The cache is an explicit
//! object handed to the extractors; tests create their own or call
//! [`PageCountCache::clear`].

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

struct CacheEntry {
    pages: u32,
    inserted_at: Instant,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Bounded, TTL-based map from document identity to page count
pub struct PageCountCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    capacity: usize,
    ttl: Duration,
}

impl PageCountCache {
    /// Create a cache holding at most `capacity` documents for `ttl`
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Cache key of a document
    pub fn key(pdf_id: &str, file_path: &str) -> String {
        format!("{}::{}", pdf_id, file_path)
    }

    /// Cached page count, or None if expired/missing
    pub fn get(&self, pdf_id: &str, file_path: &str) -> Option<u32> {
        let now = Instant::now();
        self.entries.read().ok().and_then(|guard| {
            guard
                .get(&Self::key(pdf_id, file_path))
                .filter(|entry| !entry.is_expired(now))
                .map(|entry| entry.pages)
        })
    }

    /// Remember the page count of a document
    ///
    /// When full, expired entries are dropped first, then the oldest
    /// insertion.
    pub fn insert(&self, pdf_id: &str, file_path: &str, pages: u32) {
        let now = Instant::now();
        if let Ok(mut guard) = self.entries.write() {
            let key = Self::key(pdf_id, file_path);
            if !guard.contains_key(&key) && guard.len() >= self.capacity {
                guard.retain(|_, entry| !entry.is_expired(now));
                if guard.len() >= self.capacity {
                    let oldest = guard
                        .iter()
                        .min_by_key(|(_, entry)| entry.inserted_at)
                        .map(|(k, _)| k.clone());
                    if let Some(oldest) = oldest {
                        guard.remove(&oldest);
                    }
                }
            }
            guard.insert(
                key,
                CacheEntry {
                    pages,
                    inserted_at: now,
                    expires_at: now + self.ttl,
                },
            );
        }
    }

    /// Forget every document
    pub fn clear(&self) {
        if let Ok(mut guard) = self.entries.write() {
            guard.clear();
        }
    }

    /// Number of entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.read().map(|guard| guard.len()).unwrap_or(0)
    }

    /// Whether the cache holds nothing
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PageCountCache {
    fn default() -> Self {
        Self::new(256, Duration::from_secs(3_600))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let cache = PageCountCache::default();
        assert_eq!(cache.get("pdf-1", "a.pdf"), None);
        cache.insert("pdf-1", "a.pdf", 42);
        assert_eq!(cache.get("pdf-1", "a.pdf"), Some(42));
        assert_eq!(cache.get("pdf-1", "b.pdf"), None);
    }

    #[test]
    fn test_expired_entries_are_misses() {
        let cache = PageCountCache::new(4, Duration::ZERO);
        cache.insert("pdf-1", "a.pdf", 42);
        assert_eq!(cache.get("pdf-1", "a.pdf"), None);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = PageCountCache::new(2, Duration::from_secs(60));
        cache.insert("pdf-1", "a.pdf", 1);
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("pdf-2", "b.pdf", 2);
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("pdf-3", "c.pdf", 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("pdf-1", "a.pdf"), None);
        assert_eq!(cache.get("pdf-2", "b.pdf"), Some(2));
        assert_eq!(cache.get("pdf-3", "c.pdf"), Some(3));
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let cache = PageCountCache::new(2, Duration::from_secs(60));
        cache.insert("pdf-1", "a.pdf", 1);
        cache.insert("pdf-2", "b.pdf", 2);
        cache.insert("pdf-2", "b.pdf", 5);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("pdf-1", "a.pdf"), Some(1));
        assert_eq!(cache.get("pdf-2", "b.pdf"), Some(5));
    }

    #[test]
    fn test_clear() {
        let cache = PageCountCache::default();
        cache.insert("pdf-1", "a.pdf", 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
