//! In-memory rule store with the administrative write surface.
//!
//! Writes validate first, apply under one exclusive lock, and bump the
//! version counter before the lock is released, so any reader that observes
//! the new version also observes the new data.

use super::bundle::{GroupExport, ImportReport, PolicyBundle, RuleExport};
use super::RuleStore;
use crate::error::{PolicyError, Result};
use crate::rule::validate::{validate_group, validate_rule};
use crate::rule::{
    CommandGroup, FilterRule, GroupId, ItemId, MatchItem, NewCommandGroup, NewFilterRule, RuleId,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

#[derive(Debug, Default)]
struct StoreState {
    groups: BTreeMap<GroupId, CommandGroup>,
    rules: BTreeMap<RuleId, FilterRule>,
    next_group_id: GroupId,
    next_rule_id: RuleId,
    next_item_id: ItemId,
}

impl StoreState {
    fn group_id_by_name(&self, name: &str) -> Option<GroupId> {
        self.groups
            .values()
            .find(|group| group.name == name)
            .map(|group| group.id)
    }

    fn referencing_rules(&self, group_id: GroupId) -> Vec<RuleId> {
        self.rules
            .values()
            .filter(|rule| rule.command_group_id == group_id)
            .map(|rule| rule.id)
            .collect()
    }

    fn ensure_group_exists(&self, group_id: GroupId) -> Result<()> {
        if self.groups.contains_key(&group_id) {
            Ok(())
        } else {
            Err(PolicyError::CommandGroupNotFound(group_id))
        }
    }

    fn build_group(&mut self, id: GroupId, group: NewCommandGroup) -> CommandGroup {
        let items = group
            .items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                self.next_item_id += 1;
                MatchItem {
                    id: self.next_item_id,
                    kind: item.kind,
                    pattern: item.pattern,
                    case_insensitive: item.case_insensitive,
                    order: item
                        .order
                        .unwrap_or_else(|| i32::try_from(index).unwrap_or(i32::MAX)),
                }
            })
            .collect();

        CommandGroup {
            id,
            name: group.name,
            remark: group.remark,
            items,
        }
    }

    fn insert_group(&mut self, group: NewCommandGroup) -> CommandGroup {
        self.next_group_id += 1;
        let id = self.next_group_id;
        let group = self.build_group(id, group);
        self.groups.insert(id, group.clone());
        group
    }

    fn insert_rule(&mut self, rule: NewFilterRule, priority: u8) -> FilterRule {
        self.next_rule_id += 1;
        let rule = build_rule(self.next_rule_id, rule, priority);
        self.rules.insert(rule.id, rule.clone());
        rule
    }
}

fn build_rule(id: RuleId, rule: NewFilterRule, priority: u8) -> FilterRule {
    FilterRule {
        id,
        name: rule.name,
        priority,
        enabled: rule.enabled,
        user_scope: rule.user_scope,
        asset_scope: rule.asset_scope,
        account_scope: rule.account_scope,
        command_group_id: rule.command_group_id,
        action: rule.action,
        remark: rule.remark,
    }
}

/// Thread-safe rule store kept entirely in memory.
///
/// # Example
/// ```rust
/// use bastion_policy::{Action, MemoryRuleStore, NewCommandGroup, NewFilterRule, NewMatchItem, RuleStore};
///
/// let store = MemoryRuleStore::new();
/// let group = store
///     .create_group(NewCommandGroup::new("power").item(NewMatchItem::exact("shutdown -h now")))
///     .unwrap();
/// store
///     .create_rule(NewFilterRule::new("deny shutdown", 10, group.id, Action::Deny))
///     .unwrap();
///
/// assert_eq!(store.list_enabled_rules().unwrap().len(), 1);
/// assert!(store.delete_group(group.id).is_err());
/// ```
#[derive(Debug, Default)]
pub struct MemoryRuleStore {
    state: RwLock<StoreState>,
    version: AtomicU64,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    // Command groups

    pub fn create_group(&self, group: NewCommandGroup) -> Result<CommandGroup> {
        validate_group(&group)?;

        let mut state = self.state.write();
        if state.group_id_by_name(&group.name).is_some() {
            return Err(PolicyError::DuplicateGroupName(group.name));
        }

        let group = state.insert_group(group);
        let version = self.bump_version();
        info!(group_id = group.id, name = %group.name, items = group.items.len(), version, "Created command group");
        Ok(group)
    }

    /// Replace a group's name, remark and items. Item ids are reassigned.
    pub fn update_group(&self, id: GroupId, group: NewCommandGroup) -> Result<CommandGroup> {
        validate_group(&group)?;

        let mut state = self.state.write();
        state.ensure_group_exists(id)?;
        if matches!(state.group_id_by_name(&group.name), Some(existing) if existing != id) {
            return Err(PolicyError::DuplicateGroupName(group.name));
        }

        let group = state.build_group(id, group);
        state.groups.insert(id, group.clone());
        let version = self.bump_version();
        info!(group_id = id, name = %group.name, version, "Updated command group");
        Ok(group)
    }

    /// Delete an unreferenced group.
    ///
    /// Fails with [`PolicyError::CommandGroupInUse`] while any rule, enabled
    /// or not, still points at it.
    pub fn delete_group(&self, id: GroupId) -> Result<()> {
        let mut state = self.state.write();
        state.ensure_group_exists(id)?;

        let rule_ids = state.referencing_rules(id);
        if !rule_ids.is_empty() {
            return Err(PolicyError::CommandGroupInUse {
                group_id: id,
                rule_ids,
            });
        }

        state.groups.remove(&id);
        let version = self.bump_version();
        info!(group_id = id, version, "Deleted command group");
        Ok(())
    }

    /// Delete several groups; nothing is deleted if any of them fails.
    pub fn batch_delete_groups(&self, ids: &[GroupId]) -> Result<usize> {
        let mut state = self.state.write();
        for &id in ids {
            state.ensure_group_exists(id)?;
            let rule_ids = state.referencing_rules(id);
            if !rule_ids.is_empty() {
                return Err(PolicyError::CommandGroupInUse {
                    group_id: id,
                    rule_ids,
                });
            }
        }

        let deleted = ids
            .iter()
            .filter(|&&id| state.groups.remove(&id).is_some())
            .count();
        if deleted > 0 {
            let version = self.bump_version();
            info!(deleted, version, "Batch deleted command groups");
        }
        Ok(deleted)
    }

    pub fn get_group(&self, id: GroupId) -> Result<CommandGroup> {
        self.state
            .read()
            .groups
            .get(&id)
            .cloned()
            .ok_or(PolicyError::CommandGroupNotFound(id))
    }

    pub fn get_group_by_name(&self, name: &str) -> Option<CommandGroup> {
        self.state
            .read()
            .groups
            .values()
            .find(|group| group.name == name)
            .cloned()
    }

    /// Every group, ordered by id.
    pub fn list_groups(&self) -> Vec<CommandGroup> {
        self.state.read().groups.values().cloned().collect()
    }

    // Filter rules

    pub fn create_rule(&self, rule: NewFilterRule) -> Result<FilterRule> {
        let priority = validate_rule(&rule)?;

        let mut state = self.state.write();
        state.ensure_group_exists(rule.command_group_id)?;

        let rule = state.insert_rule(rule, priority);
        let version = self.bump_version();
        info!(rule_id = rule.id, name = %rule.name, priority, action = %rule.action, version, "Created filter rule");
        Ok(rule)
    }

    pub fn update_rule(&self, id: RuleId, rule: NewFilterRule) -> Result<FilterRule> {
        let priority = validate_rule(&rule)?;

        let mut state = self.state.write();
        if !state.rules.contains_key(&id) {
            return Err(PolicyError::RuleNotFound(id));
        }
        state.ensure_group_exists(rule.command_group_id)?;

        let rule = build_rule(id, rule, priority);
        state.rules.insert(id, rule.clone());
        let version = self.bump_version();
        info!(rule_id = id, priority, action = %rule.action, version, "Updated filter rule");
        Ok(rule)
    }

    pub fn delete_rule(&self, id: RuleId) -> Result<()> {
        let mut state = self.state.write();
        if state.rules.remove(&id).is_none() {
            return Err(PolicyError::RuleNotFound(id));
        }

        let version = self.bump_version();
        info!(rule_id = id, version, "Deleted filter rule");
        Ok(())
    }

    /// Delete several rules; nothing is deleted if any id is unknown.
    pub fn batch_delete_rules(&self, ids: &[RuleId]) -> Result<usize> {
        let mut state = self.state.write();
        if let Some(&missing) = ids.iter().find(|&&id| !state.rules.contains_key(&id)) {
            return Err(PolicyError::RuleNotFound(missing));
        }

        let deleted = ids
            .iter()
            .filter(|&&id| state.rules.remove(&id).is_some())
            .count();
        if deleted > 0 {
            let version = self.bump_version();
            info!(deleted, version, "Batch deleted filter rules");
        }
        Ok(deleted)
    }

    pub fn set_rule_enabled(&self, id: RuleId, enabled: bool) -> Result<FilterRule> {
        self.update_enabled(id, |_| enabled)
    }

    /// Flip a rule between enabled and disabled.
    pub fn toggle_rule(&self, id: RuleId) -> Result<FilterRule> {
        self.update_enabled(id, |current| !current)
    }

    /// Read and write the flag under one write lock, so concurrent toggles
    /// each flip it once.
    fn update_enabled(&self, id: RuleId, next: impl FnOnce(bool) -> bool) -> Result<FilterRule> {
        let mut state = self.state.write();
        let rule = state
            .rules
            .get_mut(&id)
            .ok_or(PolicyError::RuleNotFound(id))?;

        let enabled = next(rule.enabled);
        if rule.enabled == enabled {
            return Ok(rule.clone());
        }

        rule.enabled = enabled;
        let rule = rule.clone();
        let version = self.bump_version();
        info!(rule_id = id, enabled, version, "Changed filter rule state");
        Ok(rule)
    }

    pub fn get_rule(&self, id: RuleId) -> Result<FilterRule> {
        self.state
            .read()
            .rules
            .get(&id)
            .cloned()
            .ok_or(PolicyError::RuleNotFound(id))
    }

    /// Every rule, enabled or not, in evaluation order.
    pub fn list_rules(&self) -> Vec<FilterRule> {
        let mut rules: Vec<FilterRule> = self.state.read().rules.values().cloned().collect();
        rules.sort_by_key(FilterRule::sort_key);
        rules
    }

    // Bundles

    /// Export rules and the groups they use. An empty id list exports
    /// every rule and every group.
    pub fn export(&self, rule_ids: &[RuleId]) -> PolicyBundle {
        let state = self.state.read();

        let rules: Vec<&FilterRule> = if rule_ids.is_empty() {
            state.rules.values().collect()
        } else {
            rule_ids
                .iter()
                .filter_map(|id| state.rules.get(id))
                .collect()
        };

        let groups: Vec<GroupExport> = if rule_ids.is_empty() {
            state.groups.values().map(GroupExport::from).collect()
        } else {
            let used: HashSet<GroupId> = rules.iter().map(|rule| rule.command_group_id).collect();
            state
                .groups
                .values()
                .filter(|group| used.contains(&group.id))
                .map(GroupExport::from)
                .collect()
        };

        let rules = rules
            .into_iter()
            .filter_map(|rule| {
                state
                    .groups
                    .get(&rule.command_group_id)
                    .map(|group| RuleExport::from_rule(rule, &group.name))
            })
            .collect();

        PolicyBundle { groups, rules }
    }

    /// Import a bundle.
    ///
    /// Groups whose name already exists are kept as they are, and rules
    /// whose group name resolves to nothing are skipped. Any invalid group
    /// or rule aborts the whole import before anything is written.
    pub fn import(&self, bundle: PolicyBundle) -> Result<ImportReport> {
        let mut report = ImportReport::default();
        let mut state = self.state.write();

        let mut new_groups: Vec<GroupExport> = Vec::new();
        let mut planned_names: HashSet<String> = HashSet::new();
        for group in bundle.groups {
            if state.group_id_by_name(&group.name).is_some() || planned_names.contains(&group.name) {
                debug!(name = %group.name, "Group already exists, skipping");
                report.groups_skipped += 1;
                continue;
            }
            validate_group(&group)?;
            planned_names.insert(group.name.clone());
            new_groups.push(group);
        }

        let mut new_rules: Vec<(RuleExport, u8)> = Vec::new();
        for rule in bundle.rules {
            let known = state.group_id_by_name(&rule.command_group).is_some()
                || planned_names.contains(&rule.command_group);
            if !known {
                debug!(name = %rule.name, group = %rule.command_group, "Unknown command group, skipping rule");
                report.rules_skipped += 1;
                continue;
            }
            // The group id is resolved after groups are written.
            let priority = validate_rule(&rule.to_new_rule(0))?;
            new_rules.push((rule, priority));
        }

        let mut ids_by_name: HashMap<String, GroupId> = HashMap::new();
        for group in new_groups {
            let group = state.insert_group(group);
            ids_by_name.insert(group.name.clone(), group.id);
            report.groups_created += 1;
        }

        for (rule, priority) in new_rules {
            let group_id = match ids_by_name.get(&rule.command_group) {
                Some(&id) => Some(id),
                None => state.group_id_by_name(&rule.command_group),
            };
            if let Some(group_id) = group_id {
                state.insert_rule(rule.to_new_rule(group_id), priority);
                report.rules_created += 1;
            }
        }

        if report.groups_created + report.rules_created > 0 {
            let version = self.bump_version();
            info!(
                groups_created = report.groups_created,
                rules_created = report.rules_created,
                groups_skipped = report.groups_skipped,
                rules_skipped = report.rules_skipped,
                version,
                "Imported policy bundle"
            );
        }

        Ok(report)
    }
}

impl RuleStore for MemoryRuleStore {
    fn list_enabled_rules(&self) -> Result<Vec<FilterRule>> {
        Ok(self
            .state
            .read()
            .rules
            .values()
            .filter(|rule| rule.enabled)
            .cloned()
            .collect())
    }

    fn get_command_group(&self, id: GroupId) -> Result<CommandGroup> {
        self.get_group(id)
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}
