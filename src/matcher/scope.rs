//! Scope resolution for filter rules.

use crate::cache::ScopeCache;
use crate::metrics::EngineMetrics;
use crate::rule::{AttributeRule, EntityId, FilterRule, ScopeSelector, TargetType};
use crate::store::AttributeProvider;
use tracing::warn;

/// Decides whether a `(user, asset, account)` triple is in a rule's scope.
///
/// Attribute lookups go through the [`ScopeCache`] and fall back to the
/// [`AttributeProvider`] on a miss. A failed lookup makes the selector not
/// match; it is logged and counted, never returned.
#[derive(Clone, Copy)]
pub struct ScopeResolver<'a> {
    cache: &'a ScopeCache,
    provider: &'a dyn AttributeProvider,
    metrics: &'a EngineMetrics,
}

impl<'a> ScopeResolver<'a> {
    pub fn new(
        cache: &'a ScopeCache,
        provider: &'a dyn AttributeProvider,
        metrics: &'a EngineMetrics,
    ) -> Self {
        Self {
            cache,
            provider,
            metrics,
        }
    }

    /// All three dimensions must match. Cheap checks run first so attribute
    /// lookups only happen for otherwise applicable rules.
    pub fn rule_in_scope(
        &self,
        rule: &FilterRule,
        user_id: EntityId,
        asset_id: EntityId,
        account: &str,
    ) -> bool {
        rule.account_scope.matches(account)
            && self.selector_matches(TargetType::User, &rule.user_scope, user_id)
            && self.selector_matches(TargetType::Asset, &rule.asset_scope, asset_id)
    }

    pub fn selector_matches(
        &self,
        target: TargetType,
        selector: &ScopeSelector,
        entity_id: EntityId,
    ) -> bool {
        match selector {
            ScopeSelector::All => true,
            ScopeSelector::Specific(ids) => ids.contains(&entity_id),
            ScopeSelector::Attribute(rules) => self.attributes_match(target, rules, entity_id),
        }
    }

    fn attributes_match(&self, target: TargetType, rules: &[AttributeRule], entity_id: EntityId) -> bool {
        // Zero constraints are rejected at write time; treat them as no match.
        if rules.is_empty() {
            return false;
        }

        let attributes = self
            .cache
            .get_or_load(target, entity_id, || self.provider.get_attributes(target, entity_id));

        match attributes {
            Ok(attributes) => rules
                .iter()
                .all(|rule| attributes.get(&rule.name) == Some(&rule.value)),
            Err(err) => {
                self.metrics.record_scope_error();
                warn!(
                    %target,
                    entity_id,
                    error = %err,
                    "Attribute lookup failed, treating scope as not matching"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScopeCacheConfig;
    use crate::error::{PolicyError, Result};
    use crate::rule::{AccountScope, Action};
    use crate::store::StaticAttributeProvider;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingProvider {
        calls: AtomicUsize,
    }

    impl AttributeProvider for FailingProvider {
        fn get_attributes(&self, _target: TargetType, entity_id: EntityId) -> Result<HashMap<String, String>> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Err(PolicyError::AttributeLookup {
                entity_id,
                reason: "directory unavailable".to_string(),
            })
        }
    }

    fn rule(user_scope: ScopeSelector, asset_scope: ScopeSelector, account_scope: AccountScope) -> FilterRule {
        FilterRule {
            id: 1,
            name: "r".to_string(),
            priority: 10,
            enabled: true,
            user_scope,
            asset_scope,
            account_scope,
            command_group_id: 1,
            action: Action::Deny,
            remark: String::new(),
        }
    }

    #[test]
    fn test_specific_scope_isolation() {
        let cache = ScopeCache::new(&ScopeCacheConfig::default());
        let provider = StaticAttributeProvider::new();
        let metrics = EngineMetrics::new();
        let resolver = ScopeResolver::new(&cache, &provider, &metrics);

        let rule = rule(ScopeSelector::specific([7]), ScopeSelector::All, AccountScope::All);
        assert!(resolver.rule_in_scope(&rule, 7, 1, "root"));
        assert!(!resolver.rule_in_scope(&rule, 9, 1, "root"));
    }

    #[test]
    fn test_attribute_scope_requires_every_pair() {
        let cache = ScopeCache::new(&ScopeCacheConfig::default());
        let provider = StaticAttributeProvider::new()
            .with_attribute(TargetType::User, 1, "department", "ops")
            .with_attribute(TargetType::User, 1, "level", "senior")
            .with_attribute(TargetType::User, 2, "department", "ops");
        let metrics = EngineMetrics::new();
        let resolver = ScopeResolver::new(&cache, &provider, &metrics);

        let selector = ScopeSelector::attribute([
            AttributeRule::new("department", "ops"),
            AttributeRule::new("level", "senior"),
        ]);
        assert!(resolver.selector_matches(TargetType::User, &selector, 1));
        assert!(!resolver.selector_matches(TargetType::User, &selector, 2));
        assert!(!resolver.selector_matches(TargetType::User, &selector, 3));
        // Same id, other target type.
        assert!(!resolver.selector_matches(TargetType::Asset, &selector, 1));
    }

    #[test]
    fn test_empty_attribute_selector_matches_nothing() {
        let cache = ScopeCache::new(&ScopeCacheConfig::default());
        let provider = StaticAttributeProvider::new();
        let metrics = EngineMetrics::new();
        let resolver = ScopeResolver::new(&cache, &provider, &metrics);

        assert!(!resolver.selector_matches(TargetType::User, &ScopeSelector::attribute(Vec::new()), 1));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lookup_failure_fails_closed() {
        let cache = ScopeCache::new(&ScopeCacheConfig::default());
        let provider = FailingProvider {
            calls: AtomicUsize::new(0),
        };
        let metrics = EngineMetrics::new();
        let resolver = ScopeResolver::new(&cache, &provider, &metrics);

        let selector = ScopeSelector::attribute([AttributeRule::new("department", "ops")]);
        assert!(!resolver.selector_matches(TargetType::User, &selector, 5));
        assert!(!resolver.selector_matches(TargetType::User, &selector, 5));

        // Failures are not cached, so the provider is asked again.
        assert_eq!(provider.calls.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.snapshot().scope_errors, 2);
    }

    #[test]
    fn test_account_checked_before_attribute_lookup() {
        let cache = ScopeCache::new(&ScopeCacheConfig::default());
        let provider = FailingProvider {
            calls: AtomicUsize::new(0),
        };
        let metrics = EngineMetrics::new();
        let resolver = ScopeResolver::new(&cache, &provider, &metrics);

        let rule = rule(
            ScopeSelector::attribute([AttributeRule::new("department", "ops")]),
            ScopeSelector::All,
            AccountScope::from_list("root"),
        );
        assert!(!resolver.rule_in_scope(&rule, 1, 1, "admin"));
        assert_eq!(provider.calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_attributes_are_cached() {
        let cache = ScopeCache::new(&ScopeCacheConfig::default());
        let provider = StaticAttributeProvider::new().with_attribute(TargetType::Asset, 4, "env", "prod");
        let metrics = EngineMetrics::new();
        let resolver = ScopeResolver::new(&cache, &provider, &metrics);

        let selector = ScopeSelector::attribute([AttributeRule::new("env", "prod")]);
        assert!(resolver.selector_matches(TargetType::Asset, &selector, 4));

        // Provider changes are not visible until the entry expires or is invalidated.
        provider.set(TargetType::Asset, 4, "env", "staging");
        assert!(resolver.selector_matches(TargetType::Asset, &selector, 4));

        cache.invalidate(TargetType::Asset, 4);
        assert!(!resolver.selector_matches(TargetType::Asset, &selector, 4));
    }
}
