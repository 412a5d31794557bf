//! Bounded cache of per-query centroid signals.
//!
//! Maps `(owner, query digest)` to the item → max-centroid-similarity table computed
//! for that query. Oldest entries are evicted first; entries also expire after a TTL
//! and are dropped for an owner whenever one of their centroids changes.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use crate::store::{ItemId, OwnerId};

/// Item id → max similarity between the query and the centroids of its circles.
pub type CentroidSignals = HashMap<ItemId, f32>;

/// SHA-256 over the bit patterns of every component of the query vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct QueryDigest([u8; 32]);

impl QueryDigest {
    pub fn of(query: &[f32]) -> Self {
        let mut hasher = Sha256::new();
        for x in query {
            hasher.update(x.to_bits().to_le_bytes());
        }
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&hasher.finalize());
        Self(digest)
    }
}

impl std::fmt::Display for QueryDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in &self.0[..8] {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

type CacheKey = (OwnerId, QueryDigest);

struct CacheEntry {
    inserted: Instant,
    signals: Arc<CentroidSignals>,
}

/// Hit/miss counters.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

pub struct SignalCache {
    capacity: usize,
    ttl: Duration,
    entries: HashMap<CacheKey, CacheEntry>,
    order: VecDeque<CacheKey>,
    stats: CacheStats,
}

impl SignalCache {
    /// A capacity of zero disables caching.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            entries: HashMap::new(),
            order: VecDeque::new(),
            stats: CacheStats::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn get(&mut self, owner: OwnerId, digest: QueryDigest) -> Option<Arc<CentroidSignals>> {
        let key = (owner, digest);
        let expired = match self.entries.get(&key) {
            Some(entry) if entry.inserted.elapsed() <= self.ttl => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.signals.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.remove(&key);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn insert(&mut self, owner: OwnerId, digest: QueryDigest, signals: Arc<CentroidSignals>) {
        if self.capacity == 0 {
            return;
        }
        let key = (owner, digest);
        if self.entries.contains_key(&key) {
            self.remove(&key);
        }
        while self.entries.len() >= self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if self.entries.remove(&oldest).is_some() {
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.entries.insert(
            key,
            CacheEntry {
                inserted: Instant::now(),
                signals,
            },
        );
        self.order.push_back(key);
    }

    /// Drop every entry belonging to `owner`. Returns how many were removed.
    pub fn invalidate_owner(&mut self, owner: OwnerId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(o, _), _| *o != owner);
        self.order.retain(|(o, _)| *o != owner);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn remove(&mut self, key: &CacheKey) {
        self.entries.remove(key);
        self.order.retain(|k| k != key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn signals(id: ItemId, sim: f32) -> Arc<CentroidSignals> {
        Arc::new(HashMap::from([(id, sim)]))
    }

    #[test]
    fn digest_covers_the_whole_vector() {
        let mut a = vec![0.1f32; 384];
        let mut b = a.clone();
        b[383] = 0.2;
        assert_ne!(QueryDigest::of(&a), QueryDigest::of(&b));

        // Same first ten components, different tail.
        a[50] = -0.3;
        assert_ne!(QueryDigest::of(&a), QueryDigest::of(&[0.1f32; 384]));
        assert_eq!(QueryDigest::of(&b), QueryDigest::of(&b));
    }

    #[test]
    fn hit_and_miss() {
        let mut cache = SignalCache::new(4, Duration::from_secs(60));
        let owner = Uuid::now_v7();
        let q = QueryDigest::of(&[1.0, 0.0]);

        assert!(cache.get(owner, q).is_none());
        cache.insert(owner, q, signals(1, 0.5));
        assert_eq!(cache.get(owner, q).unwrap()[&1], 0.5);
        assert!(cache.get(Uuid::now_v7(), q).is_none());
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 2);
    }

    #[test]
    fn oldest_entry_evicted_first() {
        let mut cache = SignalCache::new(2, Duration::from_secs(60));
        let owner = Uuid::now_v7();
        let q1 = QueryDigest::of(&[1.0]);
        let q2 = QueryDigest::of(&[2.0]);
        let q3 = QueryDigest::of(&[3.0]);
        cache.insert(owner, q1, signals(1, 0.1));
        cache.insert(owner, q2, signals(2, 0.2));
        cache.insert(owner, q3, signals(3, 0.3));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(owner, q1).is_none());
        assert!(cache.get(owner, q2).is_some());
        assert!(cache.get(owner, q3).is_some());
        assert_eq!(cache.stats().evictions(), 1);
    }

    #[test]
    fn expired_entries_are_misses() {
        let mut cache = SignalCache::new(2, Duration::ZERO);
        let owner = Uuid::now_v7();
        let q = QueryDigest::of(&[1.0]);
        cache.insert(owner, q, signals(1, 0.1));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(owner, q).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn invalidate_owner_keeps_others() {
        let mut cache = SignalCache::new(8, Duration::from_secs(60));
        let alice = Uuid::now_v7();
        let bob = Uuid::now_v7();
        let q = QueryDigest::of(&[1.0]);
        cache.insert(alice, q, signals(1, 0.1));
        cache.insert(alice, QueryDigest::of(&[2.0]), signals(1, 0.1));
        cache.insert(bob, q, signals(2, 0.2));

        assert_eq!(cache.invalidate_owner(alice), 2);
        assert!(cache.get(alice, q).is_none());
        assert!(cache.get(bob, q).is_some());
    }

    #[test]
    fn zero_capacity_disables_cache() {
        let mut cache = SignalCache::new(0, Duration::from_secs(60));
        let owner = Uuid::now_v7();
        let q = QueryDigest::of(&[1.0]);
        cache.insert(owner, q, signals(1, 0.1));
        assert!(cache.get(owner, q).is_none());
    }
}
