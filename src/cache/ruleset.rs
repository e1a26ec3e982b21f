//! Rule snapshot caching.
//!
//! The enabled rules are held as one immutable, pre-sorted [`RuleSnapshot`]
//! behind an `Arc`. Readers clone the `Arc` under a momentary read lock and
//! then walk the snapshot lock-free; a reload builds a complete new snapshot
//! and swaps the reference. A concurrent reader therefore sees either the old
//! list or the new one, never a mix.

use super::CacheStats;
use crate::config::RuleCacheConfig;
use crate::error::Result;
use crate::rule::{CommandGroup, FilterRule, GroupId};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A rule together with its resolved, pre-sorted command group.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: FilterRule,
    pub group: Arc<CommandGroup>,
}

/// Immutable, priority-sorted view of the enabled rules.
#[derive(Debug)]
pub struct RuleSnapshot {
    rules: Vec<CompiledRule>,
    version: u64,
    loaded_at: Instant,
    generation: u64,
}

impl RuleSnapshot {
    /// Build a snapshot from the store's rules and the groups they reference.
    ///
    /// Disabled rules are dropped, as are rules whose group is missing from
    /// `groups`. The remainder is sorted by `(priority, id)` and each group's
    /// items by `(order, id)`.
    pub fn build(
        rules: Vec<FilterRule>,
        groups: HashMap<GroupId, CommandGroup>,
        version: u64,
    ) -> Self {
        let groups: HashMap<GroupId, Arc<CommandGroup>> = groups
            .into_iter()
            .map(|(id, mut group)| {
                group.items.sort_by_key(|item| item.sort_key());
                (id, Arc::new(group))
            })
            .collect();

        let mut compiled: Vec<CompiledRule> = rules
            .into_iter()
            .filter(|rule| rule.enabled)
            .filter_map(|rule| match groups.get(&rule.command_group_id) {
                Some(group) => Some(CompiledRule {
                    group: Arc::clone(group),
                    rule,
                }),
                None => {
                    warn!(
                        rule_id = rule.id,
                        group_id = rule.command_group_id,
                        "Rule references a missing command group, skipping"
                    );
                    None
                }
            })
            .collect();

        compiled.sort_by_key(|compiled| compiled.rule.sort_key());

        Self {
            rules: compiled,
            version,
            loaded_at: Instant::now(),
            generation: 0,
        }
    }

    /// An empty snapshot, used before the first successful load.
    pub fn empty() -> Self {
        Self::build(Vec::new(), HashMap::new(), 0)
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Store version the snapshot was loaded at.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn age(&self) -> Duration {
        self.loaded_at.elapsed()
    }
}

/// Single-slot cache of the current [`RuleSnapshot`].
#[derive(Debug)]
pub struct RuleSetCache {
    current: RwLock<Option<Arc<RuleSnapshot>>>,
    reload_lock: Mutex<()>,
    generation: AtomicU64,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl RuleSetCache {
    pub fn new(config: &RuleCacheConfig) -> Self {
        Self {
            current: RwLock::new(None),
            reload_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            ttl: config.ttl(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// The cached snapshot, whether fresh or not.
    pub fn current(&self) -> Option<Arc<RuleSnapshot>> {
        self.current.read().clone()
    }

    fn is_fresh(&self, snapshot: &RuleSnapshot, store_version: u64) -> bool {
        snapshot.generation == self.generation.load(Ordering::Acquire)
            && snapshot.version == store_version
            && snapshot.loaded_at.elapsed() < self.ttl
    }

    /// Return a fresh snapshot, reloading through `loader` when needed.
    ///
    /// Reloads are single-flight. While one caller reloads, others keep
    /// using the previous snapshot instead of waiting; only callers that have
    /// no snapshot at all wait for the reload. If a reload fails and a
    /// previous snapshot exists, the previous snapshot is returned.
    pub fn get_or_reload<F>(&self, store_version: u64, loader: F) -> Result<Arc<RuleSnapshot>>
    where
        F: FnOnce() -> Result<RuleSnapshot>,
    {
        let cached = self.current();

        if let Some(snapshot) = &cached {
            if self.is_fresh(snapshot, store_version) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Arc::clone(snapshot));
            }
        }

        match cached {
            Some(stale) => {
                let Some(_guard) = self.reload_lock.try_lock() else {
                    debug!("Rule reload in progress, serving previous snapshot");
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(stale);
                };

                match self.reload(loader) {
                    Ok(snapshot) => Ok(snapshot),
                    Err(err) => {
                        warn!(error = %err, version = stale.version, "Rule reload failed, serving previous snapshot");
                        Ok(stale)
                    }
                }
            }
            None => {
                let _guard = self.reload_lock.lock();
                if let Some(snapshot) = self.current() {
                    if self.is_fresh(&snapshot, store_version) {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        return Ok(snapshot);
                    }
                }
                self.reload(loader)
            }
        }
    }

    /// Run the loader and publish its snapshot. Caller holds `reload_lock`.
    fn reload<F>(&self, loader: F) -> Result<Arc<RuleSnapshot>>
    where
        F: FnOnce() -> Result<RuleSnapshot>,
    {
        self.misses.fetch_add(1, Ordering::Relaxed);
        let generation = self.generation.load(Ordering::Acquire);

        let mut snapshot = loader()?;
        snapshot.generation = generation;
        let snapshot = Arc::new(snapshot);

        let previous = self.current.write().replace(Arc::clone(&snapshot));
        if previous.is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }

        debug!(
            rules = snapshot.len(),
            version = snapshot.version,
            "Published rule snapshot"
        );
        Ok(snapshot)
    }

    /// Mark the current snapshot stale; the next lookup reloads.
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop the snapshot entirely.
    pub fn clear(&self) {
        self.invalidate();
        *self.current.write() = None;
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: usize::from(self.current.read().is_some()),
            max_size: 1,
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PolicyError;
    use crate::rule::{AccountScope, Action, MatchItem, MatchKind, ScopeSelector};

    fn rule(id: u64, priority: u8, enabled: bool, group: GroupId) -> FilterRule {
        FilterRule {
            id,
            name: format!("rule-{id}"),
            priority,
            enabled,
            user_scope: ScopeSelector::All,
            asset_scope: ScopeSelector::All,
            account_scope: AccountScope::All,
            command_group_id: group,
            action: Action::Deny,
            remark: String::new(),
        }
    }

    fn group(id: GroupId) -> CommandGroup {
        CommandGroup {
            id,
            name: format!("group-{id}"),
            remark: String::new(),
            items: vec![
                MatchItem {
                    id: 2,
                    kind: MatchKind::Exact,
                    pattern: "second".to_string(),
                    case_insensitive: false,
                    order: 1,
                },
                MatchItem {
                    id: 1,
                    kind: MatchKind::Exact,
                    pattern: "first".to_string(),
                    case_insensitive: false,
                    order: 0,
                },
            ],
        }
    }

    fn snapshot_with(rules: Vec<FilterRule>, version: u64) -> RuleSnapshot {
        let groups = HashMap::from([(1, group(1))]);
        RuleSnapshot::build(rules, groups, version)
    }

    #[test]
    fn test_snapshot_sorts_and_filters() {
        let snapshot = snapshot_with(
            vec![
                rule(4, 10, true, 1),
                rule(3, 5, false, 1),
                rule(2, 10, true, 1),
                rule(1, 20, true, 99),
            ],
            1,
        );

        let ids: Vec<u64> = snapshot.rules().iter().map(|c| c.rule.id).collect();
        assert_eq!(ids, vec![2, 4]);
        assert_eq!(snapshot.rules()[0].group.items[0].pattern, "first");
        assert!(Arc::ptr_eq(&snapshot.rules()[0].group, &snapshot.rules()[1].group));
    }

    #[test]
    fn test_fresh_snapshot_is_reused() {
        let cache = RuleSetCache::new(&RuleCacheConfig::default());

        let first = cache
            .get_or_reload(1, || Ok(snapshot_with(vec![rule(1, 1, true, 1)], 1)))
            .unwrap();
        let second = cache
            .get_or_reload(1, || panic!("must not reload a fresh snapshot"))
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.size), (1, 1, 1));
    }

    #[test]
    fn test_version_change_triggers_reload() {
        let cache = RuleSetCache::new(&RuleCacheConfig::default());
        cache
            .get_or_reload(1, || Ok(snapshot_with(vec![rule(1, 1, true, 1)], 1)))
            .unwrap();

        let reloaded = cache
            .get_or_reload(2, || Ok(snapshot_with(Vec::new(), 2)))
            .unwrap();
        assert!(reloaded.is_empty());
        assert_eq!(reloaded.version(), 2);
    }

    #[test]
    fn test_invalidate_triggers_reload() {
        let cache = RuleSetCache::new(&RuleCacheConfig::default());
        cache
            .get_or_reload(1, || Ok(snapshot_with(vec![rule(1, 1, true, 1)], 1)))
            .unwrap();

        cache.invalidate();
        let reloaded = cache
            .get_or_reload(1, || Ok(snapshot_with(Vec::new(), 1)))
            .unwrap();
        assert!(reloaded.is_empty());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_ttl_expiry_triggers_reload() {
        let cache = RuleSetCache::new(&RuleCacheConfig { ttl_ms: 10 });
        cache
            .get_or_reload(1, || Ok(snapshot_with(vec![rule(1, 1, true, 1)], 1)))
            .unwrap();

        std::thread::sleep(Duration::from_millis(25));
        let reloaded = cache
            .get_or_reload(1, || Ok(snapshot_with(Vec::new(), 1)))
            .unwrap();
        assert!(reloaded.is_empty());
    }

    #[test]
    fn test_failed_reload_serves_previous_snapshot() {
        let cache = RuleSetCache::new(&RuleCacheConfig::default());
        cache
            .get_or_reload(1, || Ok(snapshot_with(vec![rule(1, 1, true, 1)], 1)))
            .unwrap();

        let snapshot = cache
            .get_or_reload(2, || Err(PolicyError::Store("database down".to_string())))
            .unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.version(), 1);
    }

    #[test]
    fn test_failed_first_load_is_an_error() {
        let cache = RuleSetCache::new(&RuleCacheConfig::default());
        let err = cache
            .get_or_reload(1, || Err(PolicyError::Store("database down".to_string())))
            .unwrap_err();
        assert!(matches!(err, PolicyError::Store(_)));
        assert!(cache.current().is_none());
    }

    #[test]
    fn test_invalidation_during_reload_is_not_lost() {
        let cache = RuleSetCache::new(&RuleCacheConfig::default());
        cache
            .get_or_reload(1, || {
                // A mutation lands while the loader is still reading the store.
                cache.invalidate();
                Ok(snapshot_with(vec![rule(1, 1, true, 1)], 1))
            })
            .unwrap();

        let reloaded = cache
            .get_or_reload(1, || Ok(snapshot_with(Vec::new(), 1)))
            .unwrap();
        assert!(reloaded.is_empty());
    }
}
