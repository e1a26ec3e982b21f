//! Caching subsystem.
//!
//! Three independent caches sit between the engine and its collaborators:
//! - [`PatternCache`] - compiled regexes keyed by `(pattern, case_insensitive)`, LRU bounded
//! - [`ScopeCache`] - entity attribute maps keyed by `(target, entity)`, TTL bounded
//! - [`RuleSetCache`] - the sorted rule snapshot, swapped atomically on reload
//!
//! All of them are reader-biased: hits only take a shared lock, and work that
//! can be slow (compiling, calling a collaborator) happens outside any lock.

pub mod pattern;
pub mod ruleset;
pub mod scope;

pub use pattern::{compile_pattern, PatternCache};
pub use ruleset::{CompiledRule, RuleSetCache, RuleSnapshot};
pub use scope::{AttributeMap, ScopeCache};

use serde::Serialize;

/// Point-in-time statistics of a single cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub max_size: usize,
    pub evictions: u64,
}

impl CacheStats {
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    /// Fraction of lookups served from the cache, 0.0 when nothing was looked up.
    pub fn hit_ratio(&self) -> f64 {
        let lookups = self.lookups();
        if lookups == 0 {
            return 0.0;
        }
        self.hits as f64 / lookups as f64
    }
}
