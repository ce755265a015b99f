//! Sharded, strict-LRU caches.
//!
//! Two instances exist per database: the table cache (open SSTable
//! handles, each charged 1) and the block cache (decoded data blocks,
//! charged by byte size). Entries hold strong references; eviction just
//! drops the reference, so anything still in use stays alive until its
//! last reader finishes.

use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Single-shard LRU with per-entry charges.
pub struct LruCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    capacity: usize,
    usage: usize,
    next_tick: u64,
    entries: HashMap<K, CacheEntry<V>>,
    // Recency order: smallest tick is the least recently used.
    order: BTreeMap<u64, K>,
}

struct CacheEntry<V> {
    value: V,
    charge: usize,
    tick: u64,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize) -> Self {
        LruCache {
            capacity,
            usage: 0,
            next_tick: 0,
            entries: HashMap::new(),
            order: BTreeMap::new(),
        }
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        let tick = self.next_tick;
        let entry = self.entries.get_mut(key)?;
        let old_tick = entry.tick;
        entry.tick = tick;
        let value = entry.value.clone();

        self.next_tick += 1;
        let moved = self.order.remove(&old_tick);
        debug_assert!(moved.is_some());
        self.order.insert(tick, key.clone());
        Some(value)
    }

    pub fn insert(&mut self, key: K, value: V, charge: usize) {
        self.erase(&key);

        let tick = self.next_tick;
        self.next_tick += 1;
        self.usage += charge;
        self.entries.insert(
            key.clone(),
            CacheEntry {
                value,
                charge,
                tick,
            },
        );
        self.order.insert(tick, key);

        while self.usage > self.capacity && self.entries.len() > 1 {
            self.evict_lru();
        }
    }

    pub fn erase(&mut self, key: &K) {
        if let Some(entry) = self.entries.remove(key) {
            self.usage -= entry.charge;
            self.order.remove(&entry.tick);
        }
    }

    fn evict_lru(&mut self) {
        let Some((&tick, _)) = self.order.iter().next() else {
            return;
        };
        let key = self.order.remove(&tick).expect("order entry vanished");
        let entry = self.entries.remove(&key).expect("entry vanished");
        self.usage -= entry.charge;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_charge(&self) -> usize {
        self.usage
    }
}

const NUM_SHARDS: usize = 16;

/// LRU sharded by key hash so concurrent readers rarely contend.
pub struct ShardedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    shards: Vec<Mutex<LruCache<K, V>>>,
}

impl<K, V> ShardedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize) -> Self {
        let per_shard = (capacity + NUM_SHARDS - 1) / NUM_SHARDS;
        ShardedCache {
            shards: (0..NUM_SHARDS)
                .map(|_| Mutex::new(LruCache::new(per_shard)))
                .collect(),
        }
    }

    fn shard(&self, key: &K) -> &Mutex<LruCache<K, V>> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % NUM_SHARDS]
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.shard(key).lock().unwrap().get(key)
    }

    pub fn insert(&self, key: K, value: V, charge: usize) {
        self.shard(&key).lock().unwrap().insert(key, value, charge);
    }

    pub fn erase(&self, key: &K) {
        self.shard(key).lock().unwrap().erase(key);
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().unwrap().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

static NEXT_CACHE_ID: AtomicU64 = AtomicU64::new(1);

/// Globally unique id distinguishing cache users that share one cache,
/// e.g. each open table in the block cache.
pub fn new_cache_id() -> u64 {
    NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut cache: LruCache<&str, u32> = LruCache::new(10);
        cache.insert("a", 1, 1);
        cache.insert("b", 2, 1);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"b"), Some(2));
        assert_eq!(cache.get(&"c"), None);
    }

    #[test]
    fn test_lru_eviction_order() {
        let mut cache: LruCache<u32, u32> = LruCache::new(3);
        cache.insert(1, 1, 1);
        cache.insert(2, 2, 1);
        cache.insert(3, 3, 1);

        // Touch 1 so 2 becomes the coldest entry.
        assert_eq!(cache.get(&1), Some(1));
        cache.insert(4, 4, 1);

        assert_eq!(cache.get(&2), None);
        assert_eq!(cache.get(&1), Some(1));
        assert_eq!(cache.get(&3), Some(3));
        assert_eq!(cache.get(&4), Some(4));
    }

    #[test]
    fn test_charge_based_eviction() {
        let mut cache: LruCache<&str, u32> = LruCache::new(100);
        cache.insert("big", 1, 80);
        cache.insert("small", 2, 10);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.total_charge(), 90);

        // 80 + 10 + 40 > 100 evicts the LRU entry.
        cache.insert("medium", 3, 40);
        assert_eq!(cache.get(&"big"), None);
        assert_eq!(cache.get(&"small"), Some(2));
        assert_eq!(cache.get(&"medium"), Some(3));
    }

    #[test]
    fn test_overwrite_replaces_charge() {
        let mut cache: LruCache<&str, u32> = LruCache::new(100);
        cache.insert("k", 1, 60);
        cache.insert("k", 2, 10);
        assert_eq!(cache.total_charge(), 10);
        assert_eq!(cache.get(&"k"), Some(2));
    }

    #[test]
    fn test_erase() {
        let mut cache: LruCache<&str, u32> = LruCache::new(10);
        cache.insert("k", 1, 1);
        cache.erase(&"k");
        assert_eq!(cache.get(&"k"), None);
        assert_eq!(cache.total_charge(), 0);
        // Erasing a missing key is a no-op.
        cache.erase(&"k");
    }

    #[test]
    fn test_sharded_cache() {
        let cache: ShardedCache<u64, u64> = ShardedCache::new(NUM_SHARDS * 4);
        for i in 0..64u64 {
            cache.insert(i, i * 10, 1);
        }
        // Capacity bounds each shard.
        assert!(cache.len() <= NUM_SHARDS * 4 + NUM_SHARDS);
        let hits = (0..64u64).filter(|i| cache.get(i).is_some()).count();
        assert!(hits > 0);
    }

    #[test]
    fn test_cache_ids_unique() {
        let a = new_cache_id();
        let b = new_cache_id();
        assert_ne!(a, b);
    }
}
