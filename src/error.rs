//! Error types for the bastion policy crate.

use crate::rule::{EntityId, GroupId, RuleId, ScopeDimension};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PolicyError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    // Validation errors, rejected at write time
    #[error("Invalid regex pattern '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },
    #[error("Attribute {0} scope must declare at least one attribute")]
    EmptyAttributeScope(ScopeDimension),
    #[error("Specific {0} scope must list at least one entry")]
    EmptySpecificScope(ScopeDimension),
    #[error("Invalid priority: {0} (expected 1-100)")]
    InvalidPriority(i64),
    #[error("Command group '{0}' has no match items")]
    EmptyCommandGroup(String),
    #[error("Command group name already exists: {0}")]
    DuplicateGroupName(String),
    #[error("Name must not be empty")]
    EmptyName,
    #[error("Command group '{0}' contains an empty pattern")]
    EmptyPattern(String),
    #[error("Attribute '{0}' must have a value")]
    EmptyAttributeValue(String),

    // Store lookups
    #[error("Command group not found: {0}")]
    CommandGroupNotFound(GroupId),
    #[error("Filter rule not found: {0}")]
    RuleNotFound(RuleId),
    #[error("Command group {group_id} is referenced by rules {rule_ids:?}")]
    CommandGroupInUse {
        group_id: GroupId,
        rule_ids: Vec<RuleId>,
    },

    // Collaborator failures
    #[error("Attribute lookup failed for entity {entity_id}: {reason}")]
    AttributeLookup { entity_id: EntityId, reason: String },
    #[error("Rule store error: {0}")]
    Store(String),
    #[error("Audit sink error: {0}")]
    AuditSink(String),

    // Configuration and bundle IO
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("YAML parsing error: {0}")]
    Yaml(String),
    #[error("JSON error: {0}")]
    Json(String),

    // Caller errors
    #[error("Evaluation cancelled")]
    Cancelled,
    #[error("Evaluation deadline exceeded")]
    DeadlineExceeded,
}

impl PolicyError {
    /// Whether the error was raised by rule validation.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PolicyError::InvalidRegex { .. }
                | PolicyError::EmptyAttributeScope(_)
                | PolicyError::EmptySpecificScope(_)
                | PolicyError::InvalidPriority(_)
                | PolicyError::EmptyCommandGroup(_)
                | PolicyError::DuplicateGroupName(_)
                | PolicyError::EmptyName
                | PolicyError::EmptyPattern(_)
                | PolicyError::EmptyAttributeValue(_)
        )
    }

    /// Whether the error originates from the caller giving up on the evaluation.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, PolicyError::Cancelled | PolicyError::DeadlineExceeded)
    }
}

impl From<std::io::Error> for PolicyError {
    fn from(err: std::io::Error) -> Self {
        PolicyError::Io(err.to_string())
    }
}

impl From<serde_yaml::Error> for PolicyError {
    fn from(err: serde_yaml::Error) -> Self {
        PolicyError::Yaml(err.to_string())
    }
}

impl From<serde_json::Error> for PolicyError {
    fn from(err: serde_json::Error) -> Self {
        PolicyError::Json(err.to_string())
    }
}
