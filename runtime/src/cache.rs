//! Read-through availability cache.
//!
//! Serves display reads ("how many seats are left?") without a ledger round
//! trip. Entries expire after a TTL and the least-recently-used entry is
//! evicted at capacity. Every successful commit invalidates its item.
//!
//! Booking paths never read through this cache; it is for display only.

use crate::config::CacheConfig;
use seatgate_core::inventory::{InventoryItem, ItemId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CachedItem {
    item: InventoryItem,
    cached_at: Instant,
    last_used: u64,
}

impl CachedItem {
    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.duration_since(self.cached_at) > ttl
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<ItemId, CachedItem>,
    clock: u64,
    invalidations: u64,
    hits: u64,
    misses: u64,
}

impl CacheState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Current size
    pub size: usize,
    /// Maximum capacity
    pub capacity: usize,
    /// Lookups served from the cache
    pub hits: u64,
    /// Lookups that went to the loader
    pub misses: u64,
}

/// TTL + LRU cache of inventory snapshots, safe to share across tasks.
#[derive(Debug)]
pub struct ItemCache {
    capacity: usize,
    ttl: Duration,
    state: Mutex<CacheState>,
}

impl ItemCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            capacity: config.capacity.max(1),
            ttl: config.ttl,
            state: Mutex::new(CacheState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // Cache contents are disposable; a poisoned lock still holds valid data.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Cached snapshot, if present and fresh.
    pub fn get(&self, id: ItemId) -> Option<InventoryItem> {
        let now = Instant::now();
        let mut state = self.lock();
        let tick = state.tick();

        let fresh = match state.entries.get_mut(&id) {
            Some(entry) if !entry.is_expired(self.ttl, now) => {
                entry.last_used = tick;
                Some(entry.item.clone())
            }
            Some(_) => {
                state.entries.remove(&id);
                None
            }
            None => None,
        };

        if fresh.is_some() {
            state.hits += 1;
        } else {
            state.misses += 1;
        }
        fresh
    }

    /// Store a snapshot.
    pub fn insert(&self, item: InventoryItem) {
        let mut state = self.lock();
        self.insert_locked(&mut state, item);
    }

    fn insert_locked(&self, state: &mut CacheState, item: InventoryItem) {
        let now = Instant::now();
        let ttl = self.ttl;
        state.entries.retain(|_, entry| !entry.is_expired(ttl, now));

        if state.entries.len() >= self.capacity && !state.entries.contains_key(&item.id) {
            let lru = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(id, _)| *id);
            if let Some(lru) = lru {
                state.entries.remove(&lru);
            }
        }

        let tick = state.tick();
        state.entries.insert(
            item.id,
            CachedItem {
                item,
                cached_at: now,
                last_used: tick,
            },
        );
    }

    /// Drop an item's entry after its inventory changed.
    pub fn invalidate(&self, id: ItemId) {
        let mut state = self.lock();
        state.invalidations += 1;
        state.entries.remove(&id);
    }

    /// Return the cached snapshot or load, cache and return a fresh one.
    ///
    /// A load that overlaps an invalidation is returned but not cached.
    ///
    /// # Errors
    ///
    /// Propagates the loader's error; nothing is cached then.
    pub async fn read_through<F, Fut, E>(&self, id: ItemId, load: F) -> Result<InventoryItem, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<InventoryItem, E>>,
    {
        if let Some(item) = self.get(id) {
            return Ok(item);
        }

        let generation = self.lock().invalidations;
        let item = load().await?;

        let mut state = self.lock();
        if state.invalidations == generation {
            self.insert_locked(&mut state, item.clone());
        }
        Ok(item)
    }

    /// Get cache statistics
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            size: state.entries.len(),
            capacity: self.capacity,
            hits: state.hits,
            misses: state.misses,
        }
    }
}
