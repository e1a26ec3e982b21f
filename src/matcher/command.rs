//! Command matching against a command group.

use crate::cache::PatternCache;
use crate::metrics::EngineMetrics;
use crate::rule::{CommandGroup, MatchItem, MatchKind};
use tracing::warn;

/// Whole-string equality, ignoring Unicode case when requested.
///
/// ASCII inputs take the allocation-free fast path. Other input is compared
/// by lowercase mapping, not simple case folding, so the few characters
/// whose fold differs from their lowercase form, such as `ſ` (long s)
/// against `s`, only match themselves.
pub fn exact_match(pattern: &str, command: &str, case_insensitive: bool) -> bool {
    if !case_insensitive {
        return pattern == command;
    }
    if pattern.is_ascii() && command.is_ascii() {
        return pattern.eq_ignore_ascii_case(command);
    }
    pattern
        .chars()
        .flat_map(char::to_lowercase)
        .eq(command.chars().flat_map(char::to_lowercase))
}

/// Tests command lines against groups, compiling regexes through the
/// shared [`PatternCache`].
#[derive(Debug, Clone, Copy)]
pub struct CommandMatcher<'a> {
    patterns: &'a PatternCache,
    metrics: &'a EngineMetrics,
}

impl<'a> CommandMatcher<'a> {
    pub fn new(patterns: &'a PatternCache, metrics: &'a EngineMetrics) -> Self {
        Self { patterns, metrics }
    }

    /// Whether any item of `group` matches.
    ///
    /// Items are tried in stored order, so callers pass groups whose items
    /// are already sorted by `(order, id)`.
    pub fn matches_group(&self, group: &CommandGroup, command: &str) -> bool {
        group.items.iter().any(|item| self.matches_item(item, command))
    }

    /// Every item of `group` that matches, in evaluation order.
    pub fn matching_items<'g>(&self, group: &'g CommandGroup, command: &str) -> Vec<&'g MatchItem> {
        group
            .ordered_items()
            .into_iter()
            .filter(|item| self.matches_item(item, command))
            .collect()
    }

    /// Test a single item.
    ///
    /// A regex that fails to compile only disqualifies its own item. The
    /// failure is logged and counted, never returned.
    pub fn matches_item(&self, item: &MatchItem, command: &str) -> bool {
        match item.kind {
            MatchKind::Exact => exact_match(&item.pattern, command, item.case_insensitive),
            MatchKind::Regex => match self.patterns.get(&item.pattern, item.case_insensitive) {
                Ok(regex) => regex.is_match(command),
                Err(err) => {
                    self.metrics.record_broken_pattern();
                    warn!(
                        item_id = item.id,
                        pattern = %item.pattern,
                        error = %err,
                        "Skipping match item with invalid regex"
                    );
                    false
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: u64, kind: MatchKind, pattern: &str, case_insensitive: bool) -> MatchItem {
        MatchItem {
            id,
            kind,
            pattern: pattern.to_string(),
            case_insensitive,
            order: id as i32,
        }
    }

    fn group(items: Vec<MatchItem>) -> CommandGroup {
        CommandGroup {
            id: 1,
            name: "g".to_string(),
            remark: String::new(),
            items,
        }
    }

    #[test]
    fn test_exact_case_sensitivity() {
        assert!(exact_match("rm -rf /", "rm -rf /", false));
        assert!(!exact_match("rm -rf /", "RM -RF /", false));
        assert!(exact_match("FORMAT C:", "format c:", true));
        assert!(!exact_match("rm -rf /", "rm -rf / ", false));
    }

    #[test]
    fn test_exact_unicode_folding() {
        assert!(exact_match("ÉCHO", "écho", true));
        assert!(!exact_match("ÉCHO", "écho", false));
        assert!(!exact_match("ÉCHO", "echo", true));
    }

    #[test]
    fn test_exact_lowercase_mapping_is_not_folding() {
        assert!(!exact_match("ſudo", "sudo", true));
        assert!(exact_match("ſudo", "ſUDO", true));
        assert!(exact_match("\u{212A}ILL", "kill", true));
    }

    #[test]
    fn test_regex_is_unanchored_search() {
        let patterns = PatternCache::new();
        let metrics = EngineMetrics::new();
        let matcher = CommandMatcher::new(&patterns, &metrics);

        let unanchored = item(1, MatchKind::Regex, "passwd", false);
        assert!(matcher.matches_item(&unanchored, "cat /etc/passwd"));

        let anchored = item(2, MatchKind::Regex, "^passwd$", false);
        assert!(!matcher.matches_item(&anchored, "cat /etc/passwd"));
        assert!(matcher.matches_item(&anchored, "passwd"));
    }

    #[test]
    fn test_drop_statement_regex() {
        let patterns = PatternCache::new();
        let metrics = EngineMetrics::new();
        let matcher = CommandMatcher::new(&patterns, &metrics);
        let drop = item(1, MatchKind::Regex, "^drop\\s+(database|table)\\s+", true);

        assert!(matcher.matches_item(&drop, "drop database testdb"));
        assert!(matcher.matches_item(&drop, "DROP TABLE users"));
        assert!(!matcher.matches_item(&drop, "drop view myview"));
    }

    #[test]
    fn test_broken_regex_skips_only_that_item() {
        let patterns = PatternCache::new();
        let metrics = EngineMetrics::new();
        let matcher = CommandMatcher::new(&patterns, &metrics);

        let group = group(vec![
            item(1, MatchKind::Regex, "(unclosed", false),
            item(2, MatchKind::Exact, "reboot", false),
        ]);

        assert!(matcher.matches_group(&group, "reboot"));
        assert!(!matcher.matches_group(&group, "(unclosed"));
        assert_eq!(metrics.snapshot().broken_patterns, 2);
    }

    #[test]
    fn test_matching_items_lists_all_hits_in_order() {
        let patterns = PatternCache::new();
        let metrics = EngineMetrics::new();
        let matcher = CommandMatcher::new(&patterns, &metrics);

        let mut items = vec![
            item(3, MatchKind::Regex, "^shutdown", false),
            item(1, MatchKind::Exact, "shutdown -h now", false),
            item(2, MatchKind::Exact, "reboot", false),
        ];
        items[0].order = 0;
        let group = group(items);

        let hits: Vec<u64> = matcher
            .matching_items(&group, "shutdown -h now")
            .iter()
            .map(|item| item.id)
            .collect();
        assert_eq!(hits, vec![3, 1]);
    }
}
