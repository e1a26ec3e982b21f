//! Collaborator contracts and their in-memory implementations.
//!
//! The engine reads rules through [`RuleStore`] and entity metadata through
//! [`AttributeProvider`]. Both are object-safe so embedders can put a database
//! or directory service behind them.

pub mod attributes;
pub mod bundle;
pub mod memory;

pub use attributes::StaticAttributeProvider;
pub use bundle::{GroupExport, ImportReport, PolicyBundle, RuleExport};
pub use memory::MemoryRuleStore;

use crate::error::Result;
use crate::rule::{CommandGroup, EntityId, FilterRule, GroupId, TargetType};
use std::collections::HashMap;

/// Read side of the rule storage.
pub trait RuleStore: Send + Sync {
    /// Every enabled rule, in no particular order.
    fn list_enabled_rules(&self) -> Result<Vec<FilterRule>>;

    fn get_command_group(&self, id: GroupId) -> Result<CommandGroup>;

    /// Mutation counter. Any write to a rule or group must increase it;
    /// the engine reloads its snapshot when the value changes.
    fn version(&self) -> u64;
}

/// Source of user and asset attributes for attribute-scoped selectors.
pub trait AttributeProvider: Send + Sync {
    fn get_attributes(
        &self,
        target: TargetType,
        entity_id: EntityId,
    ) -> Result<HashMap<String, String>>;
}
