//! Policy data model.
//!
//! Rules are plain data: a [`FilterRule`] binds three scope selectors and a
//! [`CommandGroup`] to an [`Action`]. Groups own their [`MatchItem`]s. Nothing
//! in this module evaluates anything; see [`crate::matcher`] for that and
//! [`validate`] for the write-time checks the store applies.

pub mod command;
pub mod filter;
pub mod scope;
pub mod validate;

pub use command::{CommandGroup, MatchItem, MatchKind, NewCommandGroup, NewMatchItem};
pub use filter::{Action, FilterRule, NewFilterRule};
pub use scope::{AccountScope, AttributeRule, ScopeSelector, TargetType};

use std::fmt;

/// Identifier of a user or asset known to the bastion.
pub type EntityId = u64;

/// Identifier of a filter rule.
pub type RuleId = u64;

/// Identifier of a command group.
pub type GroupId = u64;

/// Identifier of a match item inside a command group.
pub type ItemId = u64;

/// The three dimensions a rule can be scoped on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeDimension {
    User,
    Asset,
    Account,
}

impl fmt::Display for ScopeDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScopeDimension::User => "user",
            ScopeDimension::Asset => "asset",
            ScopeDimension::Account => "account",
        };
        f.write_str(name)
    }
}
