//! Primary policy engine interface.
//!
//! [`PolicyEngine`] answers "may this command run?" for a user, asset and
//! account. It walks an immutable, priority-sorted rule snapshot and returns
//! the first rule whose scopes and command group both match.

use crate::audit::{AuditQueue, AuditQueueStats, AuditRecord, AuditSink};
use crate::cache::{PatternCache, RuleSetCache, RuleSnapshot, ScopeCache};
use crate::config::EngineConfig;
use crate::decision::{Decision, EvaluationRequest, MatchDecision};
use crate::error::{PolicyError, Result};
use crate::matcher::{CommandMatcher, ScopeResolver};
use crate::metrics::{EngineCacheStats, EngineMetrics, MetricsSnapshot};
use crate::rule::{EntityId, GroupId, MatchItem, TargetType};
use crate::store::{AttributeProvider, RuleStore};
use rayon::prelude::*;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Caller-side reasons to abandon an evaluation.
#[derive(Clone, Copy)]
struct Interrupt<'a> {
    token: Option<&'a CancellationToken>,
    deadline: Option<Instant>,
}

impl Interrupt<'_> {
    fn none() -> Self {
        Self {
            token: None,
            deadline: None,
        }
    }

    fn check(&self) -> Option<PolicyError> {
        if self.token.is_some_and(CancellationToken::is_cancelled) {
            return Some(PolicyError::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Some(PolicyError::DeadlineExceeded);
        }
        None
    }
}

/// Command policy engine.
///
/// The engine is `Send + Sync` and meant to be shared behind an `Arc` by
/// every session thread. Evaluations never take an exclusive lock for their
/// whole duration: the rule snapshot is acquired once per call and walked
/// without locks.
///
/// # Example
/// ```rust
/// use bastion_policy::{
///     Action, EngineConfig, EvaluationRequest, MemoryRuleStore, NewCommandGroup, NewFilterRule,
///     NewMatchItem, PolicyEngine, StaticAttributeProvider,
/// };
/// use std::sync::Arc;
///
/// let store = Arc::new(MemoryRuleStore::new());
/// let group = store
///     .create_group(NewCommandGroup::new("power").item(NewMatchItem::exact("shutdown -h now")))
///     .unwrap();
/// store
///     .create_rule(NewFilterRule::new("deny shutdown", 10, group.id, Action::Deny))
///     .unwrap();
///
/// let engine = PolicyEngine::new(
///     store.clone(),
///     Arc::new(StaticAttributeProvider::new()),
///     EngineConfig::default(),
/// )
/// .unwrap();
///
/// let decision = engine.evaluate(&EvaluationRequest::new("shutdown -h now", 9, 1, "root"));
/// assert_eq!(decision.action(), Some(Action::Deny));
/// assert!(engine.evaluate(&EvaluationRequest::new("ls", 9, 1, "root")).is_allowed());
/// ```
pub struct PolicyEngine {
    store: Arc<dyn RuleStore>,
    attributes: Arc<dyn AttributeProvider>,
    config: EngineConfig,
    patterns: PatternCache,
    scopes: ScopeCache,
    rules: RuleSetCache,
    metrics: EngineMetrics,
    audit: Option<AuditQueue>,
}

impl PolicyEngine {
    /// Create an engine without audit output.
    pub fn new(
        store: Arc<dyn RuleStore>,
        attributes: Arc<dyn AttributeProvider>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            patterns: PatternCache::with_config(&config.pattern_cache),
            scopes: ScopeCache::new(&config.scope_cache),
            rules: RuleSetCache::new(&config.rule_cache),
            metrics: EngineMetrics::new(),
            audit: None,
            store,
            attributes,
            config,
        })
    }

    /// Deliver audit records for non-allow decisions to `sink`.
    ///
    /// Starts the audit worker thread. Ignored when auditing is disabled in
    /// the configuration.
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Result<Self> {
        if !self.config.audit.enabled {
            debug!("Auditing disabled, ignoring audit sink");
            return Ok(self);
        }

        if let Some(previous) = self.audit.take() {
            previous.shutdown();
        }
        self.audit = Some(AuditQueue::start(sink, &self.config.audit)?);
        Ok(self)
    }

    /// Evaluate one command.
    pub fn evaluate(&self, request: &EvaluationRequest) -> Decision {
        self.evaluate_inner(request, Interrupt::none())
    }

    /// Evaluate one command, giving up when `token` is cancelled or
    /// `deadline` passes.
    ///
    /// Interruption is checked before the walk and between rules. An
    /// abandoned evaluation returns [`Decision::Cancelled`], never an allow.
    pub fn evaluate_with_cancel(
        &self,
        request: &EvaluationRequest,
        token: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Decision {
        self.evaluate_inner(
            request,
            Interrupt {
                token: Some(token),
                deadline,
            },
        )
    }

    /// Evaluate many commands in parallel. Output order matches input order.
    pub fn evaluate_batch(&self, requests: &[EvaluationRequest]) -> Vec<Decision> {
        requests
            .par_iter()
            .map(|request| self.evaluate(request))
            .collect()
    }

    fn evaluate_inner(&self, request: &EvaluationRequest, interrupt: Interrupt<'_>) -> Decision {
        let start = Instant::now();

        if let Some(reason) = interrupt.check() {
            return self.cancelled(request, &reason);
        }

        let snapshot = self.snapshot();
        let resolver = ScopeResolver::new(&self.scopes, self.attributes.as_ref(), &self.metrics);
        let matcher = CommandMatcher::new(&self.patterns, &self.metrics);

        for compiled in snapshot.rules() {
            if let Some(reason) = interrupt.check() {
                return self.cancelled(request, &reason);
            }

            let rule = &compiled.rule;
            if !rule.enabled {
                continue;
            }
            if !resolver.rule_in_scope(rule, request.user_id, request.asset_id, &request.account) {
                continue;
            }
            if !matcher.matches_group(&compiled.group, &request.command) {
                continue;
            }

            let decision = MatchDecision {
                matched: true,
                action: rule.action,
                rule_id: rule.id,
                rule_name: rule.name.clone(),
                priority: rule.priority,
            };

            debug!(
                rule_id = rule.id,
                priority = rule.priority,
                action = %rule.action,
                user_id = request.user_id,
                asset_id = request.asset_id,
                "Command matched rule"
            );

            if rule.action.is_audited() {
                self.emit_audit(request, &decision);
            }
            self.record_evaluation(start, true);
            return Decision::Matched(decision);
        }

        self.record_evaluation(start, false);
        Decision::NoMatch
    }

    fn cancelled(&self, request: &EvaluationRequest, reason: &PolicyError) -> Decision {
        self.metrics.record_cancelled();
        debug!(
            user_id = request.user_id,
            asset_id = request.asset_id,
            reason = %reason,
            "Evaluation abandoned"
        );
        Decision::Cancelled
    }

    fn record_evaluation(&self, start: Instant, matched: bool) {
        if self.config.enable_metrics {
            self.metrics.record_evaluation(start.elapsed(), matched);
        }
    }

    fn emit_audit(&self, request: &EvaluationRequest, decision: &MatchDecision) {
        if let Some(queue) = &self.audit {
            queue.enqueue(AuditRecord::new(request, decision));
        }
    }

    /// Current rule snapshot.
    ///
    /// If the store cannot be read and no earlier snapshot exists, an empty
    /// snapshot is used for this call only, which matches no rule.
    fn snapshot(&self) -> Arc<RuleSnapshot> {
        match self.fresh_snapshot() {
            Ok(snapshot) => snapshot,
            Err(err) => {
                error!(error = %err, "Rule store unavailable and no snapshot loaded, no rules apply");
                Arc::new(RuleSnapshot::empty())
            }
        }
    }

    fn fresh_snapshot(&self) -> Result<Arc<RuleSnapshot>> {
        let version = self.store.version();
        self.rules.get_or_reload(version, || {
            self.load_snapshot(version).map_err(|err| {
                self.metrics.record_store_failure();
                err
            })
        })
    }

    fn load_snapshot(&self, version: u64) -> Result<RuleSnapshot> {
        let rules = self.store.list_enabled_rules()?;

        let group_ids: BTreeSet<GroupId> = rules.iter().map(|rule| rule.command_group_id).collect();
        let mut groups = HashMap::with_capacity(group_ids.len());
        for id in group_ids {
            match self.store.get_command_group(id) {
                Ok(group) => {
                    groups.insert(id, group);
                }
                // The snapshot skips rules whose group is gone.
                Err(PolicyError::CommandGroupNotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }

        let snapshot = RuleSnapshot::build(rules, groups, version);
        self.metrics.record_rule_reload();
        info!(rules = snapshot.len(), version, "Loaded rule snapshot");
        Ok(snapshot)
    }

    /// Every item of a group that matches `command`, in evaluation order.
    ///
    /// Meant for administrators checking a group before binding it to rules.
    pub fn test_command_match(&self, command: &str, group_id: GroupId) -> Result<Vec<MatchItem>> {
        let group = self.store.get_command_group(group_id)?;
        let matcher = CommandMatcher::new(&self.patterns, &self.metrics);
        Ok(matcher
            .matching_items(&group, command)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Load the rule snapshot and compile every regex it uses.
    ///
    /// Returns the number of compiled patterns. Patterns that fail to
    /// compile are logged and skipped.
    pub fn warm_up(&self) -> Result<usize> {
        let snapshot = self.fresh_snapshot()?;

        let mut seen = BTreeSet::new();
        let mut compiled = 0;
        for rule in snapshot.rules() {
            for (pattern, case_insensitive) in rule.group.regex_patterns() {
                if !seen.insert((pattern, case_insensitive)) {
                    continue;
                }
                match self.patterns.get(pattern, case_insensitive) {
                    Ok(_) => compiled += 1,
                    Err(err) => {
                        self.metrics.record_broken_pattern();
                        warn!(pattern, error = %err, "Pattern failed to compile during warm-up");
                    }
                }
            }
        }

        info!(rules = snapshot.len(), patterns = compiled, "Engine warmed up");
        Ok(compiled)
    }

    /// Force a rule reload on the next evaluation.
    pub fn invalidate_rules(&self) {
        self.rules.invalidate();
        debug!("Rule snapshot invalidated");
    }

    /// Forget cached attributes of one entity.
    pub fn invalidate_attributes(&self, target: TargetType, entity_id: EntityId) {
        if self.scopes.invalidate(target, entity_id) {
            debug!(%target, entity_id, "Attribute cache entry invalidated");
        }
    }

    /// Drop every cached pattern, attribute map and rule snapshot.
    pub fn clear_caches(&self) {
        self.patterns.clear();
        self.scopes.clear();
        self.rules.clear();
        info!("Engine caches cleared");
    }

    pub fn cache_stats(&self) -> EngineCacheStats {
        EngineCacheStats {
            patterns: self.patterns.stats(),
            scopes: self.scopes.stats(),
            rules: self.rules.stats(),
        }
    }

    /// Engine counters, including those of the audit queue.
    pub fn metrics(&self) -> MetricsSnapshot {
        let mut snapshot = self.metrics.snapshot();
        if let Some(audit) = self.audit_stats() {
            snapshot.audit_enqueued = audit.enqueued;
            snapshot.audit_dropped = audit.dropped;
            snapshot.audit_sink_failures = audit.sink_failures;
        }
        snapshot
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
        if let Some(queue) = &self.audit {
            queue.reset_stats();
        }
    }

    pub fn audit_stats(&self) -> Option<AuditQueueStats> {
        self.audit.as_ref().map(AuditQueue::stats)
    }

    /// Wait for queued audit records to reach the sink.
    ///
    /// Returns `true` immediately when auditing is off.
    pub fn flush_audit(&self, timeout: Duration) -> bool {
        self.audit
            .as_ref()
            .map_or(true, |queue| queue.flush(timeout))
    }

    /// Deliver pending audit records and stop the audit worker.
    pub fn shutdown(&self) {
        if let Some(queue) = &self.audit {
            queue.shutdown();
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl std::fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("config", &self.config)
            .field("store_version", &self.store.version())
            .field("cache_stats", &self.cache_stats())
            .field("audit", &self.audit)
            .finish()
    }
}
