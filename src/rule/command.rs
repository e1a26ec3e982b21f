//! Command groups and their match items.

use super::{GroupId, ItemId};
use serde::{Deserialize, Serialize};

/// How a match item compares against a command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Whole-string equality.
    #[serde(alias = "command")]
    Exact,
    /// Unanchored regex search.
    Regex,
}

/// One literal-or-regex command pattern.
///
/// Items are immutable once stored; editing a group replaces its items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchItem {
    pub id: ItemId,
    pub kind: MatchKind,
    pub pattern: String,
    #[serde(default)]
    pub case_insensitive: bool,
    #[serde(default)]
    pub order: i32,
}

impl MatchItem {
    /// Position of the item within its group: `order` first, then `id`.
    pub fn sort_key(&self) -> (i32, ItemId) {
        (self.order, self.id)
    }
}

/// A reusable, named, ordered collection of match items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandGroup {
    pub id: GroupId,
    pub name: String,
    #[serde(default)]
    pub remark: String,
    pub items: Vec<MatchItem>,
}

impl CommandGroup {
    /// Items in evaluation order.
    pub fn ordered_items(&self) -> Vec<&MatchItem> {
        let mut items: Vec<&MatchItem> = self.items.iter().collect();
        items.sort_by_key(|item| item.sort_key());
        items
    }

    /// Every `(pattern, case_insensitive)` pair of the group's regex items.
    pub fn regex_patterns(&self) -> impl Iterator<Item = (&str, bool)> {
        self.items
            .iter()
            .filter(|item| item.kind == MatchKind::Regex)
            .map(|item| (item.pattern.as_str(), item.case_insensitive))
    }
}

/// Match item as submitted to the store, before an id is assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMatchItem {
    pub kind: MatchKind,
    pub pattern: String,
    #[serde(default)]
    pub case_insensitive: bool,
    /// Explicit position; defaults to the item's index in the submitted list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i32>,
}

impl NewMatchItem {
    pub fn exact(pattern: impl Into<String>) -> Self {
        Self {
            kind: MatchKind::Exact,
            pattern: pattern.into(),
            case_insensitive: false,
            order: None,
        }
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Self {
            kind: MatchKind::Regex,
            pattern: pattern.into(),
            case_insensitive: false,
            order: None,
        }
    }

    pub fn case_insensitive(mut self) -> Self {
        self.case_insensitive = true;
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = Some(order);
        self
    }
}

/// Command group as submitted to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCommandGroup {
    pub name: String,
    #[serde(default)]
    pub remark: String,
    pub items: Vec<NewMatchItem>,
}

impl NewCommandGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            remark: String::new(),
            items: Vec::new(),
        }
    }

    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = remark.into();
        self
    }

    pub fn item(mut self, item: NewMatchItem) -> Self {
        self.items.push(item);
        self
    }
}

impl From<&CommandGroup> for NewCommandGroup {
    fn from(group: &CommandGroup) -> Self {
        Self {
            name: group.name.clone(),
            remark: group.remark.clone(),
            items: group
                .ordered_items()
                .into_iter()
                .map(|item| NewMatchItem {
                    kind: item.kind,
                    pattern: item.pattern.clone(),
                    case_insensitive: item.case_insensitive,
                    order: Some(item.order),
                })
                .collect(),
        }
    }
}
