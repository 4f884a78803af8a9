//! A capacity-bounded, per-entry-TTL cache with strict LRU eviction (C1).
//!
//! Used to hold the per-source-IP [`crate::passage::UserContext`] set: small
//! enough to scan linearly in the rare case of a full eviction sweep, but
//! indexed so lookup and touch are both `O(log n)` even at the default
//! capacity of a few thousand entries.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    tick: u64,
    expires_at: Instant,
}

pub struct LruTtlCache<K, V> {
    map: HashMap<K, Entry<V>>,
    order: BTreeMap<u64, K>,
    next_tick: u64,
    capacity: usize,
    ttl: Duration,
}

impl<K, V> LruTtlCache<K, V>
where
    K: Eq + Hash + Clone + Ord,
{
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self { map: HashMap::new(), order: BTreeMap::new(), next_tick: 0, capacity, ttl }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Looks up `key`, refreshing its recency on a hit. Expired entries are
    /// removed and treated as a miss.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.touch(key)?;
        self.map.get(key).map(|e| &e.value)
    }

    /// Like [`Self::get`] but returns a mutable reference, for callers that
    /// need to update the cached value in place (e.g. promoting an entry
    /// within it) without a remove-then-reinsert round trip.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.touch(key)?;
        self.map.get_mut(key).map(|e| &mut e.value)
    }

    /// Refreshes recency for `key` and evicts it if expired. Returns `None`
    /// if the key is absent or was just expired away.
    fn touch(&mut self, key: &K) -> Option<()> {
        let expired = matches!(self.map.get(key), Some(e) if Instant::now() >= e.expires_at);
        if expired {
            self.remove(key);
            return None;
        }
        let entry = self.map.get_mut(key)?;
        self.order.remove(&entry.tick);
        let tick = self.next_tick;
        self.next_tick += 1;
        entry.tick = tick;
        self.order.insert(tick, key.clone());
        Some(())
    }

    /// Inserts or replaces `key`, resetting its TTL from now and marking it
    /// most-recently-used. Evicts the least-recently-used entry if this push
    /// would exceed capacity.
    pub fn put(&mut self, key: K, value: V) {
        if let Some(old) = self.map.get(&key) {
            self.order.remove(&old.tick);
        }
        let tick = self.bump_tick();
        self.order.insert(tick, key.clone());
        let expires_at = Instant::now() + self.ttl;
        self.map.insert(key, Entry { value, tick, expires_at });

        while self.map.len() > self.capacity {
            let Some((&oldest_tick, _)) = self.order.iter().next() else { break };
            let oldest_key = self.order.remove(&oldest_tick).expect("key present for tick");
            self.map.remove(&oldest_key);
        }
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let entry = self.map.remove(key)?;
        self.order.remove(&entry.tick);
        Some(entry.value)
    }

    /// Runs `f` over every live value without disturbing recency order.
    /// Used to bulk-update cached values in place, e.g. re-syncing every
    /// cached [`crate::passage::UserContext`] after a registry change.
    pub fn for_each_mut(&mut self, mut f: impl FnMut(&mut V)) {
        for entry in self.map.values_mut() {
            f(&mut entry.value);
        }
    }

    /// Sweeps expired entries. Callers with a background ticker may run
    /// this periodically instead of paying the cost on every `get`.
    pub fn prune_expired(&mut self) {
        let now = Instant::now();
        let expired: Vec<K> =
            self.map.iter().filter(|(_, e)| now >= e.expires_at).map(|(k, _)| k.clone()).collect();
        for key in expired {
            self.remove(&key);
        }
    }

    fn bump_tick(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }
}
