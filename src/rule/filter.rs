//! Filter rules and their actions.

use super::scope::{AccountScope, ScopeSelector};
use super::{GroupId, RuleId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What the session layer should do with a command matched by a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Deny,
    Allow,
    Alert,
    PromptAlert,
}

impl Action {
    /// Non-allow actions are written to the audit trail.
    pub fn is_audited(self) -> bool {
        !matches!(self, Action::Allow)
    }

    /// Whether the command may run without further operator interaction.
    pub fn permits_execution(self) -> bool {
        matches!(self, Action::Allow | Action::Alert)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Deny => "deny",
            Action::Allow => "allow",
            Action::Alert => "alert",
            Action::PromptAlert => "prompt_alert",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored, prioritized policy entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    pub id: RuleId,
    pub name: String,
    /// 1-100, lower is evaluated first.
    pub priority: u8,
    pub enabled: bool,
    #[serde(default)]
    pub user_scope: ScopeSelector,
    #[serde(default)]
    pub asset_scope: ScopeSelector,
    #[serde(default)]
    pub account_scope: AccountScope,
    pub command_group_id: GroupId,
    pub action: Action,
    #[serde(default)]
    pub remark: String,
}

impl FilterRule {
    /// Evaluation order key. The id breaks ties between equal priorities.
    pub fn sort_key(&self) -> (u8, RuleId) {
        (self.priority, self.id)
    }
}

/// Filter rule as submitted to the store, before an id is assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFilterRule {
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
    pub command_group_id: GroupId,
    pub action: Action,
    #[serde(default)]
    pub remark: String,
}

fn default_enabled() -> bool {
    true
}

impl NewFilterRule {
    /// An enabled, all-scope rule.
    pub fn new(name: impl Into<String>, priority: i64, command_group_id: GroupId, action: Action) -> Self {
        Self {
            name: name.into(),
            priority,
            enabled: true,
            user_scope: ScopeSelector::All,
            asset_scope: ScopeSelector::All,
            account_scope: AccountScope::All,
            command_group_id,
            action,
            remark: String::new(),
        }
    }

    pub fn users(mut self, scope: ScopeSelector) -> Self {
        self.user_scope = scope;
        self
    }

    pub fn assets(mut self, scope: ScopeSelector) -> Self {
        self.asset_scope = scope;
        self
    }

    pub fn accounts(mut self, scope: AccountScope) -> Self {
        self.account_scope = scope;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = remark.into();
        self
    }
}

impl From<&FilterRule> for NewFilterRule {
    fn from(rule: &FilterRule) -> Self {
        Self {
            name: rule.name.clone(),
            priority: i64::from(rule.priority),
            enabled: rule.enabled,
            user_scope: rule.user_scope.clone(),
            asset_scope: rule.asset_scope.clone(),
            account_scope: rule.account_scope.clone(),
            command_group_id: rule.command_group_id,
            action: rule.action,
            remark: rule.remark.clone(),
        }
    }
}
