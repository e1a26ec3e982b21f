//! Portable policy bundles.
//!
//! A bundle carries groups and rules between stores. Rules point at their
//! group by name because ids are local to a store.

use crate::error::Result;
use crate::rule::{
    AccountScope, Action, FilterRule, GroupId, NewCommandGroup, NewFilterRule,
    ScopeSelector,
};
use serde::{Deserialize, Serialize};

/// Exported form of a command group.
pub type GroupExport = NewCommandGroup;

/// Exported form of a filter rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleExport {
    pub name: String,
    pub priority: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub user_scope: ScopeSelector,
    #[serde(default)]
    pub asset_scope: ScopeSelector,
    #[serde(default)]
    pub account_scope: AccountScope,
    /// Name of the referenced command group.
    pub command_group: String,
    pub action: Action,
    #[serde(default)]
    pub remark: String,
}

fn default_enabled() -> bool {
    true
}

impl RuleExport {
    pub fn from_rule(rule: &FilterRule, group_name: &str) -> Self {
        Self {
            name: rule.name.clone(),
            priority: i64::from(rule.priority),
            enabled: rule.enabled,
            user_scope: rule.user_scope.clone(),
            asset_scope: rule.asset_scope.clone(),
            account_scope: rule.account_scope.clone(),
            command_group: group_name.to_string(),
            action: rule.action,
            remark: rule.remark.clone(),
        }
    }

    pub fn to_new_rule(&self, command_group_id: GroupId) -> NewFilterRule {
        NewFilterRule {
            name: self.name.clone(),
            priority: self.priority,
            enabled: self.enabled,
            user_scope: self.user_scope.clone(),
            asset_scope: self.asset_scope.clone(),
            account_scope: self.account_scope.clone(),
            command_group_id,
            action: self.action,
            remark: self.remark.clone(),
        }
    }
}

/// Groups and rules in a store-independent form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyBundle {
    #[serde(default)]
    pub groups: Vec<GroupExport>,
    #[serde(default)]
    pub rules: Vec<RuleExport>,
}

impl PolicyBundle {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.rules.is_empty()
    }

    pub fn group(&self, name: &str) -> Option<&GroupExport> {
        self.groups.iter().find(|group| group.name == name)
    }
}

/// Outcome of [`MemoryRuleStore::import`](super::MemoryRuleStore::import).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub groups_created: usize,
    pub groups_skipped: usize,
    pub rules_created: usize,
    pub rules_skipped: usize,
}
