//! Process-wide price cache with per-key single-flight.

use crate::types::{Network, ResolvedPrice};
use alloy_primitives::Address;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

/// Cache key: a token is identified by its address on a given network.
#[derive(Hash, PartialEq, Eq, Clone, Copy, Debug)]
pub struct PriceCacheKey {
    pub network: Network,
    pub address: Address,
}

impl PriceCacheKey {
    pub fn new(network: Network, address: Address) -> Self {
        Self { network, address }
    }
}

#[derive(Clone, Debug, Default)]
pub struct CacheEntry {
    /// Last successfully resolved price. Survives failed refreshes.
    pub price: Option<ResolvedPrice>,
    /// When the last fetch settled, successful or not.
    pub timestamp: Option<Instant>,
    pub in_flight: bool,
}

/// Snapshot of cache counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheMetrics {
    pub hits: usize,
    pub misses: usize,
    pub fetches: usize,
    pub entries: usize,
}

pub struct PriceCache {
    entries: Mutex<LruCache<PriceCacheKey, CacheEntry>>,
    min_interval: Duration,
    settled: Notify,
    hits: AtomicUsize,
    misses: AtomicUsize,
    fetches: AtomicUsize,
}

/// Keys a caller took ownership of for fetching, plus the keys another caller
/// is already fetching. Keys not settled through [`Claim::finish`] are
/// released on drop so an abandoned fetch cannot wedge them.
pub struct Claim<'a> {
    cache: &'a PriceCache,
    fetch: Vec<PriceCacheKey>,
    pub pending: Vec<PriceCacheKey>,
    /// Prices held for the claimed keys at claim time.
    pub cached: HashMap<PriceCacheKey, ResolvedPrice>,
}

impl Claim<'_> {
    pub fn keys(&self) -> &[PriceCacheKey] {
        &self.fetch
    }

    pub fn is_empty(&self) -> bool {
        self.fetch.is_empty()
    }

    /// Settles every claimed key with the price `lookup` returns for it.
    pub fn finish(mut self, mut lookup: impl FnMut(&PriceCacheKey) -> Option<ResolvedPrice>) {
        for key in std::mem::take(&mut self.fetch) {
            let price = lookup(&key);
            self.cache.complete(key, price);
        }
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if !self.fetch.is_empty() {
            self.cache.release(&self.fetch);
        }
    }
}

impl PriceCache {
    pub fn new(capacity: usize, min_interval: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            min_interval,
            settled: Notify::new(),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<PriceCacheKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Marks every key that needs a fetch as in flight and hands it to the
    /// caller. A key needs a fetch when it has never settled or settled longer
    /// than the minimum interval ago, or always with `force`. Keys already in
    /// flight are never handed out twice.
    pub fn claim(&self, keys: &[PriceCacheKey], force: bool) -> Claim<'_> {
        let now = Instant::now();
        let mut fetch = Vec::new();
        let mut pending = Vec::new();
        let mut cached = HashMap::new();
        {
            let mut entries = self.lock();
            for key in keys {
                make_room(&mut entries, key, keys);
                let entry = entries.get_or_insert_mut(*key, CacheEntry::default);
                if let Some(price) = &entry.price {
                    cached.insert(*key, price.clone());
                }
                if entry.in_flight {
                    if !pending.contains(key) {
                        pending.push(*key);
                    }
                    continue;
                }
                let fresh = entry
                    .timestamp
                    .is_some_and(|ts| now.saturating_duration_since(ts) < self.min_interval);
                if fresh && !force {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                entry.in_flight = true;
                self.misses.fetch_add(1, Ordering::Relaxed);
                fetch.push(*key);
            }
        }
        if !fetch.is_empty() {
            self.fetches.fetch_add(1, Ordering::Relaxed);
        }
        Claim { cache: self, fetch, pending, cached }
    }

    /// Settles a fetch. A `None` price keeps whatever was cached before;
    /// the timestamp moves either way so failures are throttled too.
    pub fn complete(&self, key: PriceCacheKey, price: Option<ResolvedPrice>) {
        {
            let mut entries = self.lock();
            make_room(&mut entries, &key, &[]);
            let entry = entries.get_or_insert_mut(key, CacheEntry::default);
            entry.in_flight = false;
            entry.timestamp = Some(Instant::now());
            if let Some(price) = price.filter(ResolvedPrice::is_valid) {
                entry.price = Some(price);
            }
        }
        self.settled.notify_waiters();
    }

    fn release(&self, keys: &[PriceCacheKey]) {
        {
            let mut entries = self.lock();
            for key in keys {
                if let Some(entry) = entries.peek_mut(key) {
                    entry.in_flight = false;
                }
            }
        }
        self.settled.notify_waiters();
    }

    /// Waits until none of `keys` is in flight.
    pub async fn wait_settled(&self, keys: &[PriceCacheKey]) {
        if keys.is_empty() {
            return;
        }
        loop {
            let notified = self.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let busy = {
                let entries = self.lock();
                keys.iter().any(|k| entries.peek(k).is_some_and(|e| e.in_flight))
            };
            if !busy {
                return;
            }
            notified.await;
        }
    }

    pub fn price(&self, key: &PriceCacheKey) -> Option<ResolvedPrice> {
        self.lock().get(key).and_then(|e| e.price.clone())
    }

    pub fn entry(&self, key: &PriceCacheKey) -> Option<CacheEntry> {
        self.lock().peek(key).cloned()
    }

    /// Drops one key. Returns whether it was present.
    pub fn invalidate_token(&self, key: &PriceCacheKey) -> bool {
        self.lock().pop(key).is_some()
    }

    pub fn clear(&self) {
        self.lock().clear();
        self.settled.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

/// Frees a slot for `key` if inserting it would evict something. The least
/// recently used entry that is neither in flight nor in `protected` goes;
/// if there is none the cache grows by one instead.
fn make_room(entries: &mut LruCache<PriceCacheKey, CacheEntry>, key: &PriceCacheKey, protected: &[PriceCacheKey]) {
    if entries.len() < entries.cap().get() || entries.contains(key) {
        return;
    }
    let victim = entries
        .iter()
        .rev()
        .find(|(k, e)| !e.in_flight && !protected.contains(*k))
        .map(|(k, _)| *k);
    match victim {
        Some(victim) => {
            entries.pop(&victim);
        }
        None => {
            let grown = entries.cap().saturating_add(1);
            debug!(capacity = grown.get(), "price cache full of in-flight keys, growing");
            entries.resize(grown);
        }
    }
}
