//! Write-time validation of groups and rules.
//!
//! Everything checked here is rejected before it reaches the store, so the
//! evaluation path never has to deal with an ill-formed definition. The one
//! exception is a stored regex that stops compiling later; the matcher skips
//! such an item instead.

use super::command::{MatchKind, NewCommandGroup};
use super::filter::NewFilterRule;
use super::scope::{AccountScope, ScopeSelector};
use super::ScopeDimension;
use crate::cache::compile_pattern;
use crate::error::{PolicyError, Result};

pub const MIN_PRIORITY: i64 = 1;
pub const MAX_PRIORITY: i64 = 100;

/// Check a submitted command group.
pub fn validate_group(group: &NewCommandGroup) -> Result<()> {
    if group.name.trim().is_empty() {
        return Err(PolicyError::EmptyName);
    }
    if group.items.is_empty() {
        return Err(PolicyError::EmptyCommandGroup(group.name.clone()));
    }

    // An empty regex matches every command line.
    if group.items.iter().any(|item| item.pattern.trim().is_empty()) {
        return Err(PolicyError::EmptyPattern(group.name.clone()));
    }

    for item in group.items.iter().filter(|item| item.kind == MatchKind::Regex) {
        compile_pattern(&item.pattern, item.case_insensitive)?;
    }

    Ok(())
}

/// Check a submitted rule and return its priority narrowed to `u8`.
///
/// Whether the referenced group exists is a store concern and is not
/// checked here.
pub fn validate_rule(rule: &NewFilterRule) -> Result<u8> {
    if rule.name.trim().is_empty() {
        return Err(PolicyError::EmptyName);
    }

    let priority = validate_priority(rule.priority)?;
    validate_selector(ScopeDimension::User, &rule.user_scope)?;
    validate_selector(ScopeDimension::Asset, &rule.asset_scope)?;
    validate_account(&rule.account_scope)?;

    Ok(priority)
}

pub fn validate_priority(priority: i64) -> Result<u8> {
    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        return Err(PolicyError::InvalidPriority(priority));
    }
    u8::try_from(priority).map_err(|_| PolicyError::InvalidPriority(priority))
}

/// Specific selectors need at least one id and attribute selectors at
/// least one constraint; an empty one would silently match nothing.
pub fn validate_selector(dimension: ScopeDimension, selector: &ScopeSelector) -> Result<()> {
    match selector {
        ScopeSelector::All => Ok(()),
        ScopeSelector::Specific(ids) if ids.is_empty() => {
            Err(PolicyError::EmptySpecificScope(dimension))
        }
        ScopeSelector::Specific(_) => Ok(()),
        ScopeSelector::Attribute(rules) if rules.is_empty() => {
            Err(PolicyError::EmptyAttributeScope(dimension))
        }
        ScopeSelector::Attribute(rules) => {
            for rule in rules {
                if rule.name.trim().is_empty() {
                    return Err(PolicyError::EmptyName);
                }
                if rule.value.trim().is_empty() {
                    return Err(PolicyError::EmptyAttributeValue(rule.name.clone()));
                }
            }
            Ok(())
        }
    }
}

pub fn validate_account(scope: &AccountScope) -> Result<()> {
    match scope {
        AccountScope::Specific(names) if names.is_empty() => {
            Err(PolicyError::EmptySpecificScope(ScopeDimension::Account))
        }
        _ => Ok(()),
    }
}
