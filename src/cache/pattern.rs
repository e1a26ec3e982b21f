//! Compiled regex caching for command matching.
//!
//! Every regex match item goes through this cache, so a given
//! `(pattern, case_insensitive)` pair is compiled once per process rather than
//! once per evaluation.

use super::CacheStats;
use crate::config::PatternCacheConfig;
use crate::error::{PolicyError, Result};
use parking_lot::RwLock;
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Upper bound on the compiled program size of a single pattern.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// Compile a command pattern.
///
/// Case-insensitivity is baked into the compiled program, so the returned
/// regex can be shared between callers without any runtime folding.
pub fn compile_pattern(pattern: &str, case_insensitive: bool) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
        .map_err(|e| PolicyError::InvalidRegex {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

/// LRU-bounded cache of compiled patterns.
///
/// # Thread Safety
/// Hits take the read lock only; recency is tracked with an atomic tick per
/// entry so readers never need the write lock. Compilation runs with no lock
/// held and only the final insertion is exclusive.
#[derive(Debug)]
pub struct PatternCache {
    storage: RwLock<PatternStorage>,
    max_size: usize,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// Entries split by case mode so lookups can borrow the pattern as `&str`.
#[derive(Debug, Default)]
struct PatternStorage {
    case_sensitive: HashMap<String, CachedPattern>,
    case_insensitive: HashMap<String, CachedPattern>,
}

impl PatternStorage {
    fn map(&self, case_insensitive: bool) -> &HashMap<String, CachedPattern> {
        if case_insensitive {
            &self.case_insensitive
        } else {
            &self.case_sensitive
        }
    }

    fn map_mut(&mut self, case_insensitive: bool) -> &mut HashMap<String, CachedPattern> {
        if case_insensitive {
            &mut self.case_insensitive
        } else {
            &mut self.case_sensitive
        }
    }

    fn len(&self) -> usize {
        self.case_sensitive.len() + self.case_insensitive.len()
    }
}

#[derive(Debug)]
struct CachedPattern {
    regex: Arc<Regex>,
    last_used: AtomicU64,
}

impl PatternCache {
    pub fn new() -> Self {
        Self::with_config(&PatternCacheConfig::default())
    }

    pub fn with_config(config: &PatternCacheConfig) -> Self {
        Self {
            storage: RwLock::new(PatternStorage::default()),
            max_size: config.max_size.max(1),
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Get a compiled pattern, compiling and caching it on first use.
    ///
    /// Compilation failures are returned but never cached.
    pub fn get(&self, pattern: &str, case_insensitive: bool) -> Result<Arc<Regex>> {
        {
            let storage = self.storage.read();
            if let Some(cached) = storage.map(case_insensitive).get(pattern) {
                cached.last_used.store(self.tick(), Ordering::Relaxed);
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Arc::clone(&cached.regex));
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(pattern, case_insensitive, "Pattern cache miss, compiling");
        let regex = Arc::new(compile_pattern(pattern, case_insensitive)?);

        let mut storage = self.storage.write();
        // Another caller may have compiled the same pattern meanwhile.
        if let Some(existing) = storage.map(case_insensitive).get(pattern) {
            return Ok(Arc::clone(&existing.regex));
        }

        if storage.len() >= self.max_size {
            self.evict_lru(&mut storage);
        }

        storage.map_mut(case_insensitive).insert(
            pattern.to_string(),
            CachedPattern {
                regex: Arc::clone(&regex),
                last_used: AtomicU64::new(self.tick()),
            },
        );

        Ok(regex)
    }

    /// Evict the least recently used tenth of the cache (at least one entry).
    fn evict_lru(&self, storage: &mut PatternStorage) {
        let mut candidates: Vec<(bool, String, u64)> = storage
            .case_sensitive
            .iter()
            .map(|(pattern, cached)| (false, pattern, cached))
            .chain(
                storage
                    .case_insensitive
                    .iter()
                    .map(|(pattern, cached)| (true, pattern, cached)),
            )
            .map(|(ci, pattern, cached)| {
                (ci, pattern.clone(), cached.last_used.load(Ordering::Relaxed))
            })
            .collect();

        candidates.sort_by_key(|(_, _, last_used)| *last_used);

        let evict_count = (self.max_size / 10).max(1);
        for (ci, pattern, _) in candidates.into_iter().take(evict_count) {
            storage.map_mut(ci).remove(&pattern);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Warm the cache with known patterns.
    ///
    /// Returns the first compilation error; patterns before it stay cached.
    pub fn precompile<'a>(
        &self,
        patterns: impl IntoIterator<Item = (&'a str, bool)>,
    ) -> Result<usize> {
        let mut count = 0;
        for (pattern, case_insensitive) in patterns {
            self.get(pattern, case_insensitive)?;
            count += 1;
        }
        Ok(count)
    }

    pub fn contains(&self, pattern: &str, case_insensitive: bool) -> bool {
        self.storage
            .read()
            .map(case_insensitive)
            .contains_key(pattern)
    }

    pub fn len(&self) -> usize {
        self.storage.read().len()
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

    /// Drop every entry and reset the statistics.
    pub fn clear(&self) {
        let mut storage = self.storage.write();
        storage.case_sensitive.clear();
        storage.case_insensitive.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }
}

impl Default for PatternCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn small_cache(max_size: usize) -> PatternCache {
        PatternCache::with_config(&PatternCacheConfig { max_size })
    }

    #[test]
    fn test_cache_miss_then_hit() {
        let cache = PatternCache::new();

        let first = cache.get("^rm\\s+-rf", false).unwrap();
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);

        let second = cache.get("^rm\\s+-rf", false).unwrap();
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.size, 1);

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_case_mode_is_part_of_key() {
        let cache = PatternCache::new();

        let sensitive = cache.get("^drop", false).unwrap();
        let insensitive = cache.get("^drop", true).unwrap();

        assert_eq!(cache.len(), 2);
        assert!(!Arc::ptr_eq(&sensitive, &insensitive));
        assert!(!sensitive.is_match("DROP TABLE users"));
        assert!(insensitive.is_match("DROP TABLE users"));
    }

    #[test]
    fn test_compile_failures_are_not_cached() {
        let cache = PatternCache::new();

        let err = cache.get("[unclosed", false).unwrap_err();
        assert!(matches!(err, PolicyError::InvalidRegex { .. }));
        assert!(!cache.contains("[unclosed", false));

        // A second attempt compiles again instead of replaying a cached failure.
        assert!(cache.get("[unclosed", false).is_err());
        assert_eq!(cache.stats().misses, 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_eviction() {
        let cache = small_cache(3);

        cache.get("pattern1", false).unwrap();
        cache.get("pattern2", false).unwrap();
        cache.get("pattern3", false).unwrap();
        cache.get("pattern4", false).unwrap();

        let stats = cache.stats();
        assert!(stats.evictions > 0);
        assert!(cache.len() <= 3);
    }

    #[test]
    fn test_recently_used_pattern_survives_eviction() {
        let cache = small_cache(2);

        cache.get("old", false).unwrap();
        cache.get("hot", false).unwrap();
        // Touch "old" so "hot" becomes the least recently used entry.
        cache.get("old", false).unwrap();
        cache.get("new", false).unwrap();

        assert!(cache.contains("old", false));
        assert!(cache.contains("new", false));
        assert!(!cache.contains("hot", false));
    }

    #[test]
    fn test_precompile() {
        let cache = PatternCache::new();
        let count = cache
            .precompile([("^shutdown", false), ("^reboot", true)])
            .unwrap();
        assert_eq!(count, 2);
        assert!(cache.contains("^reboot", true));

        assert!(cache.precompile([("ok", false), ("(", false)]).is_err());
        assert!(cache.contains("ok", false));
    }

    #[test]
    fn test_clear_resets_stats() {
        let cache = PatternCache::new();
        cache.get("a", false).unwrap();
        cache.get("a", false).unwrap();
        cache.clear();

        assert_eq!(cache.stats(), CacheStats { max_size: 1000, ..Default::default() });
    }

    #[test]
    fn test_concurrent_access_shares_compiled_regex() {
        let cache = Arc::new(PatternCache::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for _ in 0..100 {
                        let regex = cache.get("^drop\\s+(database|table)\\s+", true).unwrap();
                        assert!(regex.is_match("drop database testdb"));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("thread panicked");
        }

        let stats = cache.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.lookups(), 800);
    }
}
