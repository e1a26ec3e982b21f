//! In-memory attribute provider.

use super::AttributeProvider;
use crate::error::Result;
use crate::rule::{EntityId, TargetType};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Attribute provider backed by a map, editable at runtime.
///
/// Unknown entities resolve to an empty attribute map, which no attribute
/// selector can match.
#[derive(Debug, Default)]
pub struct StaticAttributeProvider {
    attributes: RwLock<HashMap<(TargetType, EntityId), HashMap<String, String>>>,
}

impl StaticAttributeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a single attribute, keeping the entity's other attributes.
    pub fn set(
        &self,
        target: TargetType,
        entity_id: EntityId,
        name: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.attributes
            .write()
            .entry((target, entity_id))
            .or_default()
            .insert(name.into(), value.into());
    }

    /// Replace every attribute of an entity.
    pub fn replace(&self, target: TargetType, entity_id: EntityId, attributes: HashMap<String, String>) {
        self.attributes.write().insert((target, entity_id), attributes);
    }

    pub fn remove(&self, target: TargetType, entity_id: EntityId) {
        self.attributes.write().remove(&(target, entity_id));
    }

    pub fn with_attribute(
        self,
        target: TargetType,
        entity_id: EntityId,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.set(target, entity_id, name, value);
        self
    }
}

impl AttributeProvider for StaticAttributeProvider {
    fn get_attributes(
        &self,
        target: TargetType,
        entity_id: EntityId,
    ) -> Result<HashMap<String, String>> {
        Ok(self
            .attributes
            .read()
            .get(&(target, entity_id))
            .cloned()
            .unwrap_or_default())
    }
}
