//! Ordered permit/deny command filters.
//!
//! Patterns are matched against the whole command line: a pattern is
//! wrapped as `^(?:...)$` before compiling, and a leading `^` written by the
//! operator is dropped as redundant. `show .*` therefore matches every
//! `show` command, while `show` alone only matches the bare word.

use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use super::model::{Action, CommandFilterEntry};
use crate::error::ValidationError;

/// Upper bound for a single compiled pattern.
const PATTERN_SIZE_LIMIT: usize = 1 << 20;

/// Rewrites a pattern into its fully anchored form.
#[must_use]
pub fn normalize_pattern(pattern: &str) -> String {
    let body = pattern.trim();
    let body = body.strip_prefix('^').unwrap_or(body);
    let body = match body.strip_suffix('$') {
        Some(stripped) if !stripped.ends_with('\\') => stripped,
        _ => body,
    };
    format!("^(?:{body})$")
}

pub fn compile_pattern(pattern: &str) -> Result<Regex, ValidationError> {
    RegexBuilder::new(&normalize_pattern(pattern))
        .size_limit(PATTERN_SIZE_LIMIT)
        .build()
        .map_err(|e| ValidationError::new("pattern", format!("'{pattern}': {e}")))
}

/// Collapses whitespace so `show   run` and `show run` are the same command.
#[must_use]
pub fn normalize_command(command: &str) -> String {
    command.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Compiled patterns for one snapshot, keyed by the pattern text.
///
/// Built once and shared read-only; a new snapshot gets a new cache.
#[derive(Debug, Clone, Default)]
pub struct PatternCache {
    patterns: Arc<HashMap<String, Regex>>,
}

impl PatternCache {
    pub fn build<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Result<Self, ValidationError> {
        let mut compiled = HashMap::new();
        for pattern in patterns {
            if !compiled.contains_key(pattern) {
                compiled.insert(pattern.to_string(), compile_pattern(pattern)?);
            }
        }

        Ok(Self {
            patterns: Arc::new(compiled),
        })
    }

    #[must_use]
    pub fn get(&self, pattern: &str) -> Option<&Regex> {
        self.patterns.get(pattern)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Checks ordinal order and duplicates of one rule's entries.
pub fn check_entries(entries: &[CommandFilterEntry]) -> Result<(), ValidationError> {
    let mut ordinals = HashSet::new();
    let mut seen = HashSet::new();

    for entry in entries {
        if !ordinals.insert(entry.ordinal) {
            return Err(ValidationError::new(
                "ordinal",
                format!("ordinal {} is used twice", entry.ordinal),
            ));
        }
        if !seen.insert((entry.pattern.as_str(), entry.action)) {
            return Err(ValidationError::new(
                "pattern",
                format!("duplicate {} entry for '{}'", entry.action, entry.pattern),
            ));
        }
    }

    Ok(())
}

#[derive(Debug, Clone)]
struct CompiledEntry {
    regex: Regex,
    action: Action,
}

/// A rule's command filter: first matching entry wins, otherwise deny.
#[derive(Debug, Clone)]
pub struct CommandFilter {
    entries: Vec<CompiledEntry>,
}

impl CommandFilter {
    /// Default action when no entry matches.
    pub const DEFAULT_ACTION: Action = Action::Deny;

    /// Compiles entries in ordinal order, reusing regexes from `cache`.
    pub fn new(
        entries: &[CommandFilterEntry],
        cache: &PatternCache,
    ) -> Result<Self, ValidationError> {
        check_entries(entries)?;

        let mut ordered: Vec<&CommandFilterEntry> = entries.iter().collect();
        ordered.sort_by_key(|e| e.ordinal);

        let entries = ordered
            .into_iter()
            .map(|e| {
                let regex = match cache.get(&e.pattern) {
                    Some(regex) => regex.clone(),
                    None => compile_pattern(&e.pattern)?,
                };
                Ok(CompiledEntry {
                    regex,
                    action: e.action,
                })
            })
            .collect::<Result<Vec<_>, ValidationError>>()?;

        Ok(Self { entries })
    }

    #[must_use]
    pub fn evaluate(&self, command: &str) -> Action {
        let command = normalize_command(command);
        self.entries
            .iter()
            .find(|e| e.regex.is_match(&command))
            .map_or(Self::DEFAULT_ACTION, |e| e.action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ordinal: i32, pattern: &str, action: Action) -> CommandFilterEntry {
        CommandFilterEntry {
            ordinal,
            pattern: pattern.to_string(),
            action,
        }
    }

    fn filter(entries: &[CommandFilterEntry]) -> CommandFilter {
        let cache = PatternCache::build(entries.iter().map(|e| e.pattern.as_str())).unwrap();
        CommandFilter::new(entries, &cache).unwrap()
    }

    #[test]
    fn test_normalize_pattern() {
        assert_eq!(normalize_pattern("show .*"), "^(?:show .*)$");
        assert_eq!(normalize_pattern("^show .*"), "^(?:show .*)$");
        assert_eq!(normalize_pattern("^reload$"), "^(?:reload)$");
        assert_eq!(normalize_pattern(r"foo\$"), r"^(?:foo\$)$");
    }

    #[test]
    fn test_first_match_wins() {
        let f = filter(&[
            entry(1, "show running-config.*", Action::Deny),
            entry(2, "show .*", Action::Permit),
        ]);

        assert_eq!(f.evaluate("show running-config"), Action::Deny);
        assert_eq!(f.evaluate("show interfaces"), Action::Permit);
    }

    #[test]
    fn test_order_follows_ordinal_not_input_order() {
        let f = filter(&[
            entry(20, "show .*", Action::Permit),
            entry(10, "show running-config.*", Action::Deny),
        ]);

        assert_eq!(f.evaluate("show running-config"), Action::Deny);
    }

    #[test]
    fn test_default_deny() {
        let f = filter(&[entry(1, "show .*", Action::Permit)]);
        assert_eq!(f.evaluate("configure terminal"), Action::Deny);

        let f = filter(&[]);
        assert_eq!(f.evaluate("anything"), Action::Deny);
    }

    #[test]
    fn test_partial_match_does_not_bypass() {
        let f = filter(&[
            entry(1, "show", Action::Permit),
            entry(2, "reload", Action::Deny),
        ]);

        // An unanchored "show" would match inside this line.
        assert_eq!(f.evaluate("reload ; show"), Action::Deny);
        assert_eq!(f.evaluate("configure show"), Action::Deny);
        assert_eq!(f.evaluate("show"), Action::Permit);
    }

    #[test]
    fn test_whitespace_is_collapsed() {
        let f = filter(&[entry(1, "show version", Action::Permit)]);
        assert_eq!(f.evaluate("  show    version "), Action::Permit);
    }

    #[test]
    fn test_duplicates_rejected() {
        let entries = [
            entry(1, "show .*", Action::Permit),
            entry(2, "show .*", Action::Permit),
        ];
        let err = CommandFilter::new(&entries, &PatternCache::default()).unwrap_err();
        assert_eq!(err.field, "pattern");

        let entries = [
            entry(1, "show .*", Action::Permit),
            entry(1, "ping .*", Action::Permit),
        ];
        let err = CommandFilter::new(&entries, &PatternCache::default()).unwrap_err();
        assert_eq!(err.field, "ordinal");

        // Same pattern with a different action is allowed.
        let entries = [
            entry(1, "show .*", Action::Deny),
            entry(2, "show .*", Action::Permit),
        ];
        assert!(CommandFilter::new(&entries, &PatternCache::default()).is_ok());
    }

    #[test]
    fn test_cache_fails_fast_on_bad_regex() {
        let err = PatternCache::build(["show .*", "show ("]).unwrap_err();
        assert_eq!(err.field, "pattern");
    }

    #[test]
    fn test_cache_dedupes_patterns() {
        let cache = PatternCache::build(["show .*", "show .*", "ping .*"]).unwrap();
        assert_eq!(cache.len(), 2);
        assert!(cache.get("show .*").is_some());
    }
}
