use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use crate::cache::LruTtlCache;
use crate::config::CacheConfig;

use super::registry::PassageRegistry;
use super::types::Passage;

/// The passages seen from a single source address, ordered most-recently-
/// matched first.
///
/// Trial decryption tries candidates in this order, so a source that keeps
/// reconnecting with the same passage pays for at most one failed attempt
/// per connection after its first.
pub struct UserContext {
    order: Vec<Arc<Passage>>,
}

impl UserContext {
    fn seeded_from(registry: &PassageRegistry) -> Self {
        let snapshot = registry.snapshot();
        Self { order: snapshot.values().cloned().collect() }
    }

    /// Tries `probe` against each candidate passage in recency order. On a
    /// match, that passage is promoted to the front so the next connection
    /// from this source tries it first. `probe` is a closure rather than a
    /// trait object so callers can close over per-connection state (e.g. the
    /// salt already read off the wire) without an allocation.
    pub fn auth<T>(&mut self, mut probe: impl FnMut(&Passage) -> Option<T>) -> Option<(Arc<Passage>, T)> {
        let (hit, out) = self.order.iter().enumerate().find_map(|(i, p)| Some((i, probe(p)?)))?;
        let passage = self.order.remove(hit);
        self.order.insert(0, passage.clone());
        Some((passage, out))
    }

    /// Re-synchronizes this context's candidate list against the current
    /// registry snapshot: passages the registry removed are dropped, new
    /// passages are appended, and the existing recency order is preserved
    /// for everything that survives.
    pub fn refresh(&mut self, registry: &PassageRegistry) {
        let snapshot = registry.snapshot();
        self.order.retain(|p| snapshot.contains_key(p.key()));
        for (key, passage) in snapshot.iter() {
            if !self.order.iter().any(|p| p.key() == key) {
                self.order.push(passage.clone());
            }
        }
    }
}

/// Combines the per-source-IP [`UserContext`] cache (C1) with the passage
/// registry: a source IP not seen before is lazily seeded from the current
/// registry snapshot on first use rather than pre-populated for every
/// possible address.
pub struct UserContextStore {
    cache: Mutex<LruTtlCache<IpAddr, UserContext>>,
    registry: Arc<PassageRegistry>,
}

impl UserContextStore {
    pub fn new(registry: Arc<PassageRegistry>, config: &CacheConfig) -> Self {
        Self {
            cache: Mutex::new(LruTtlCache::new(config.user_context_capacity, config.user_context_ttl())),
            registry,
        }
    }

    /// Authenticates `source` against its cached passage candidates,
    /// seeding and refreshing the candidate list as needed.
    pub fn auth<T>(
        &self,
        source: IpAddr,
        probe: impl FnMut(&Passage) -> Option<T>,
    ) -> Option<(Arc<Passage>, T)> {
        let mut cache = self.cache.lock().expect("user context cache mutex poisoned");
        if cache.get(&source).is_none() {
            cache.put(source, UserContext::seeded_from(&self.registry));
        }
        let ctx = cache.get_mut(&source)?;
        ctx.auth(probe)
    }

    /// Refreshes every cached context against the current registry
    /// snapshot. Called after a `SyncPassages` update so already-cached
    /// sources pick up added/removed passages without waiting for their
    /// entry to expire.
    pub fn refresh_all(&self) {
        let mut cache = self.cache.lock().expect("user context cache mutex poisoned");
        cache.for_each_mut(|ctx| ctx.refresh(&self.registry));
    }
}
