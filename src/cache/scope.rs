//! Attribute caching for attribute-scoped selectors.
//!
//! Entries expire after a fixed TTL because attributes can be changed by
//! administrators outside the engine. Expiry is lazy: a stale entry is
//! reported as a miss on read, and expired entries are physically removed by
//! a sweep that runs at most once per `sweep_interval`, piggybacked on an
//! insertion. No timer or thread exists per entry, or at all.

use super::CacheStats;
use crate::config::ScopeCacheConfig;
use crate::error::Result;
use crate::rule::{EntityId, TargetType};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Shared, immutable attribute map of one entity.
pub type AttributeMap = Arc<HashMap<String, String>>;

type ScopeKey = (TargetType, EntityId);

#[derive(Debug)]
struct ScopeEntry {
    attributes: AttributeMap,
    inserted_at: Instant,
}

#[derive(Debug)]
struct ScopeStorage {
    entries: HashMap<ScopeKey, ScopeEntry>,
    last_sweep: Instant,
}

/// TTL cache of entity attributes keyed by `(target type, entity id)`.
#[derive(Debug)]
pub struct ScopeCache {
    storage: RwLock<ScopeStorage>,
    ttl: Duration,
    sweep_interval: Duration,
    max_size: usize,
    /// Bumped under the write lock by every invalidation.
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ScopeCache {
    pub fn new(config: &ScopeCacheConfig) -> Self {
        Self {
            storage: RwLock::new(ScopeStorage {
                entries: HashMap::new(),
                last_sweep: Instant::now(),
            }),
            ttl: config.ttl(),
            sweep_interval: config.sweep_interval(),
            max_size: config.max_size.max(1),
            generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Fresh attributes for an entity, if cached.
    pub fn get(&self, target: TargetType, entity_id: EntityId) -> Option<AttributeMap> {
        let storage = self.storage.read();
        match storage.entries.get(&(target, entity_id)) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(&entry.attributes))
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store attributes for an entity, replacing any previous entry.
    pub fn insert(
        &self,
        target: TargetType,
        entity_id: EntityId,
        attributes: HashMap<String, String>,
    ) -> AttributeMap {
        let attributes = Arc::new(attributes);
        let mut storage = self.storage.write();
        self.insert_locked(&mut storage, (target, entity_id), Arc::clone(&attributes));
        attributes
    }

    fn insert_locked(&self, storage: &mut ScopeStorage, key: ScopeKey, attributes: AttributeMap) {
        let now = Instant::now();

        if now.duration_since(storage.last_sweep) >= self.sweep_interval {
            self.sweep_expired(storage, now);
        }

        if !storage.entries.contains_key(&key) && storage.entries.len() >= self.max_size {
            self.sweep_expired(storage, now);
            if storage.entries.len() >= self.max_size {
                self.evict_oldest(storage);
            }
        }

        storage.entries.insert(
            key,
            ScopeEntry {
                attributes,
                inserted_at: now,
            },
        );
    }

    /// Cached attributes, or the loader's result which is then cached.
    ///
    /// The loader runs without any lock held. Loader errors are returned
    /// and nothing is cached for the entity. A result loaded across an
    /// invalidation is returned to the caller but not cached.
    pub fn get_or_load<F>(
        &self,
        target: TargetType,
        entity_id: EntityId,
        loader: F,
    ) -> Result<AttributeMap>
    where
        F: FnOnce() -> Result<HashMap<String, String>>,
    {
        if let Some(attributes) = self.get(target, entity_id) {
            return Ok(attributes);
        }

        debug!(%target, entity_id, "Scope cache miss, loading attributes");
        let generation = self.generation.load(Ordering::Acquire);
        let attributes = Arc::new(loader()?);

        let mut storage = self.storage.write();
        if self.generation.load(Ordering::Acquire) == generation {
            self.insert_locked(&mut storage, (target, entity_id), Arc::clone(&attributes));
        } else {
            debug!(%target, entity_id, "Scope cache invalidated during load, not caching");
        }
        Ok(attributes)
    }

    fn sweep_expired(&self, storage: &mut ScopeStorage, now: Instant) {
        let ttl = self.ttl;
        let before = storage.entries.len();
        storage
            .entries
            .retain(|_, entry| now.duration_since(entry.inserted_at) < ttl);
        let removed = before - storage.entries.len();
        storage.last_sweep = now;

        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed, remaining = storage.entries.len(), "Swept expired scope entries");
        }
    }

    fn evict_oldest(&self, storage: &mut ScopeStorage) {
        let oldest = storage
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.inserted_at)
            .map(|(key, _)| *key);

        if let Some(key) = oldest {
            storage.entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Forget one entity, e.g. after its attributes were edited.
    pub fn invalidate(&self, target: TargetType, entity_id: EntityId) -> bool {
        let mut storage = self.storage.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        storage.entries.remove(&(target, entity_id)).is_some()
    }

    /// Forget every entity of one target type.
    pub fn invalidate_target(&self, target: TargetType) {
        let mut storage = self.storage.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        storage
            .entries
            .retain(|(entry_target, _), _| *entry_target != target);
    }

    pub fn clear(&self) {
        let mut storage = self.storage.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        storage.entries.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }

    /// Number of stored entries, including expired ones not swept yet.
    pub fn len(&self) -> usize {
        self.storage.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.len(),
            max_size: self.max_size,
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
