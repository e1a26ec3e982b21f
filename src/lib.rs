//! # Bastion Command Policy Engine
//!
//! Real-time command filtering for SSH bastion sessions. Given the command a
//! user is about to run on an asset, the engine decides whether to allow,
//! deny, alert, or alert and prompt, based on prioritized filter rules.
//!
//! ## Model
//!
//! - A [`CommandGroup`] is a named, ordered list of exact or regex [`MatchItem`]s.
//! - A [`FilterRule`] binds a user, asset and account scope plus one command
//!   group to an [`Action`]. Rules are evaluated by ascending priority (1-100),
//!   ties broken by ascending id; the first full match decides.
//! - No matching rule means the command is allowed.
//!
//! ## Quick Start
//!
//! ```rust
//! use bastion_policy::{
//!     Action, EngineConfig, EvaluationRequest, MemoryRuleStore, NewCommandGroup, NewFilterRule,
//!     NewMatchItem, PolicyEngine, ScopeSelector, StaticAttributeProvider,
//! };
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryRuleStore::new());
//! let power = store.create_group(
//!     NewCommandGroup::new("power").item(NewMatchItem::exact("shutdown -h now")),
//! )?;
//! store.create_rule(NewFilterRule::new("deny shutdown", 10, power.id, Action::Deny))?;
//! store.create_rule(
//!     NewFilterRule::new("allow shutdown for user 7", 5, power.id, Action::Allow)
//!         .users(ScopeSelector::specific([7])),
//! )?;
//!
//! let engine = PolicyEngine::new(
//!     store,
//!     Arc::new(StaticAttributeProvider::new()),
//!     EngineConfig::default(),
//! )?;
//!
//! let decision = engine.evaluate(&EvaluationRequest::new("shutdown -h now", 7, 1, "root"));
//! assert_eq!(decision.action(), Some(Action::Allow));
//!
//! let decision = engine.evaluate(&EvaluationRequest::new("shutdown -h now", 9, 1, "root"));
//! assert_eq!(decision.action(), Some(Action::Deny));
//! # Ok::<(), bastion_policy::PolicyError>(())
//! ```
//!
//! ## Logging
//!
//! The crate logs through `tracing` and never installs a subscriber.

pub mod audit;
pub mod cache;
pub mod config;
pub mod decision;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod metrics;
pub mod rule;
pub mod store;

pub use engine::PolicyEngine;

// Inputs and outputs
pub use decision::{Decision, EvaluationRequest, MatchDecision};

// Configuration
pub use config::{AuditConfig, EngineConfig, PatternCacheConfig, RuleCacheConfig, ScopeCacheConfig};

// Core types and errors
pub use error::{PolicyError, Result};
pub use rule::{
    AccountScope, Action, AttributeRule, CommandGroup, EntityId, FilterRule, GroupId, ItemId,
    MatchItem, MatchKind, NewCommandGroup, NewFilterRule, NewMatchItem, RuleId, ScopeDimension,
    ScopeSelector, TargetType,
};

// Collaborators
pub use audit::{AuditContext, AuditRecord, AuditSink, JsonLinesSink, MemoryAuditSink};
pub use store::{
    AttributeProvider, ImportReport, MemoryRuleStore, PolicyBundle, RuleStore,
    StaticAttributeProvider,
};

// Statistics
pub use cache::CacheStats;
pub use metrics::{EngineCacheStats, MetricsSnapshot};

pub use tokio_util::sync::CancellationToken;
