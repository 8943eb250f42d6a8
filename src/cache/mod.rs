//! Neighbor cache
//!
//! Provides an LRU cache of per-user neighbor lists so that KNN prediction
//! does not recompute cosine similarities for users it has already seen.
//! Entries depend on the training matrix, so the cache must be cleared on
//! every fit.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Neighbor ids of a user with their cosine similarity
pub type Neighbors = Arc<Vec<(usize, f64)>>;

/// LRU cache from user id to neighbor list
pub struct NeighborCache {
    cache: LruCache<usize, Neighbors>,
    hits: u64,
    misses: u64,
}

impl NeighborCache {
    /// Create a new cache holding at most `capacity` users
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    /// Get the neighbors of `user` from cache
    pub fn get(&mut self, user: usize) -> Option<Neighbors> {
        if let Some(neighbors) = self.cache.get(&user) {
            self.hits += 1;
            Some(Arc::clone(neighbors))
        } else {
            self.misses += 1;
            None
        }
    }

    /// Put the neighbors of `user` into cache
    pub fn put(&mut self, user: usize, neighbors: Neighbors) {
        self.cache.put(user, neighbors);
    }

    /// Get cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            capacity: self.cache.cap().get(),
            size: self.cache.len(),
        }
    }

    /// Drop every entry and reset the counters
    pub fn clear(&mut self) {
        self.cache.clear();
        self.hits = 0;
        self.misses = 0;
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub capacity: usize,
    pub size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neighbors(ids: &[usize]) -> Neighbors {
        Arc::new(ids.iter().map(|&i| (i, 1.0)).collect())
    }

    #[test]
    fn test_neighbor_cache_basic() {
        let mut cache = NeighborCache::new(3);

        // Cache miss
        assert!(cache.get(0).is_none());
        assert_eq!(cache.stats().misses, 1);

        // Put and get
        cache.put(0, neighbors(&[1, 2]));
        assert_eq!(cache.get(0).unwrap().len(), 2);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().size, 1);
    }

    #[test]
    fn test_neighbor_cache_lru_eviction() {
        let mut cache = NeighborCache::new(2);

        cache.put(0, neighbors(&[1]));
        cache.put(1, neighbors(&[2]));
        cache.put(2, neighbors(&[3])); // Should evict user 0

        assert!(cache.get(0).is_none()); // Evicted
        assert!(cache.get(1).is_some()); // Still there
        assert!(cache.get(2).is_some()); // Still there
    }

    #[test]
    fn test_hit_rate_calculation() {
        let mut cache = NeighborCache::new(10);

        // No accesses yet
        assert_eq!(cache.hit_rate(), 0.0);

        // All misses
        cache.get(0);
        cache.get(1);
        assert_eq!(cache.hit_rate(), 0.0);

        cache.put(0, neighbors(&[1]));
        cache.get(0); // Hit
        cache.get(0); // Hit

        // 2 hits, 2 misses = 50%
        assert_eq!(cache.hit_rate(), 0.5);
    }

    #[test]
    fn test_zero_capacity_holds_one_user() {
        let mut cache = NeighborCache::new(0);
        assert_eq!(cache.stats().capacity, 1);
        cache.put(3, neighbors(&[0]));
        assert!(cache.get(3).is_some());
    }

    #[test]
    fn test_cache_clear() {
        let mut cache = NeighborCache::new(10);
        cache.put(0, neighbors(&[1]));
        cache.get(0);

        cache.clear();

        assert!(cache.get(0).is_none());
        assert_eq!(cache.stats().hits, 0);
        assert_eq!(cache.stats().misses, 1); // From the get after clear
    }
}
