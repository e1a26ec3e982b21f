//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use bastion_policy::{
    Action, EngineConfig, GroupId, MemoryRuleStore, NewCommandGroup, NewFilterRule, NewMatchItem,
    PolicyEngine, ScopeSelector, StaticAttributeProvider,
};
use std::sync::{Arc, Once};

static TRACING: Once = Once::new();

/// Install a test-writer subscriber once per test binary.
///
/// Set `RUST_LOG=bastion_policy=debug` to see engine logs.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn engine(store: Arc<MemoryRuleStore>) -> PolicyEngine {
    engine_with_attributes(store, Arc::new(StaticAttributeProvider::new()))
}

pub fn engine_with_attributes(
    store: Arc<MemoryRuleStore>,
    attributes: Arc<StaticAttributeProvider>,
) -> PolicyEngine {
    init_tracing();
    PolicyEngine::new(store, attributes, EngineConfig::development()).unwrap()
}

/// A `power` group matching `shutdown -h now` exactly and anything starting
/// with `reboot`.
pub fn power_group(store: &MemoryRuleStore) -> GroupId {
    store
        .create_group(
            NewCommandGroup::new("power")
                .item(NewMatchItem::exact("shutdown -h now"))
                .item(NewMatchItem::regex("^reboot\\b")),
        )
        .unwrap()
        .id
}

/// The bastion scenario: deny shutdown for everyone at priority 10, allow it
/// for user 7 at priority 5.
pub fn shutdown_policy() -> (Arc<MemoryRuleStore>, GroupId) {
    let store = Arc::new(MemoryRuleStore::new());
    let group = power_group(&store);
    store
        .create_rule(NewFilterRule::new("deny shutdown", 10, group, Action::Deny))
        .unwrap();
    store
        .create_rule(
            NewFilterRule::new("allow shutdown for user 7", 5, group, Action::Allow)
                .users(ScopeSelector::specific([7])),
        )
        .unwrap();
    (store, group)
}
