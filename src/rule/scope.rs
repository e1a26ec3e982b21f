//! Scope selectors.
//!
//! A selector is a tagged variant per dimension. Accounts have no attribute
//! mode, so [`AccountScope`] is a separate type and an account attribute
//! selector cannot be expressed at all.

use super::EntityId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Kind of entity an attribute lookup is made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    User,
    Asset,
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetType::User => f.write_str("user"),
            TargetType::Asset => f.write_str("asset"),
        }
    }
}

/// A single `name == value` constraint on an entity's attributes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeRule {
    pub name: String,
    pub value: String,
}

impl AttributeRule {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// User or asset scope of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", content = "values", rename_all = "snake_case")]
pub enum ScopeSelector {
    /// Every entity.
    #[default]
    All,
    /// Only the listed entity ids.
    Specific(HashSet<EntityId>),
    /// Entities whose attributes satisfy every listed constraint.
    Attribute(Vec<AttributeRule>),
}

impl ScopeSelector {
    pub fn specific(ids: impl IntoIterator<Item = EntityId>) -> Self {
        ScopeSelector::Specific(ids.into_iter().collect())
    }

    pub fn attribute(rules: impl IntoIterator<Item = AttributeRule>) -> Self {
        ScopeSelector::Attribute(rules.into_iter().collect())
    }

    pub fn is_all(&self) -> bool {
        matches!(self, ScopeSelector::All)
    }
}

/// Account scope of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", content = "values", rename_all = "snake_case")]
pub enum AccountScope {
    #[default]
    All,
    /// Account names, compared case-sensitively.
    Specific(HashSet<String>),
}

impl AccountScope {
    /// Parse a comma-separated account list such as `"root, admin"`.
    ///
    /// Blank entries are dropped.
    pub fn from_list(list: &str) -> Self {
        AccountScope::Specific(
            list.split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn specific<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        AccountScope::Specific(names.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, account: &str) -> bool {
        match self {
            AccountScope::All => true,
            AccountScope::Specific(names) => names.contains(account),
        }
    }
}
