//! Single-rule matching against one `(key, value)` pair.
//!
//! Keys are HTTP identifiers and match case-insensitively; values may carry
//! sensitive payloads and match case-sensitively. A regex that fails to
//! compile must never accidentally match, so compile failure is a no-match.

use regex::RegexBuilder;

use super::config::{Rule, RuleKind};

/// Check whether `rule` matches the component `(key, value)` pair.
///
/// A rule whose key and value are both empty after trimming matches nothing.
/// An empty key (or value) side is treated as "any"; the other side decides.
pub fn rule_matches(rule: &Rule, component_key: &str, component_value: &str) -> bool {
    let rule_key = rule.key.trim();
    let rule_value = rule.value.trim();

    if rule_key.is_empty() && rule_value.is_empty() {
        return false;
    }

    let key_ok = if rule_key.is_empty() {
        true
    } else {
        match rule.key_rule_type {
            RuleKind::Regex => match RegexBuilder::new(rule_key).case_insensitive(true).build() {
                Ok(re) => re.is_match(component_key),
                Err(_) => return false,
            },
            RuleKind::Value => component_key.eq_ignore_ascii_case(rule_key),
        }
    };

    let value_ok = if rule_value.is_empty() {
        true
    } else {
        match rule.rule_type {
            RuleKind::Regex => match RegexBuilder::new(rule_value).build() {
                Ok(re) => re.is_match(component_value),
                Err(_) => return false,
            },
            RuleKind::Value => component_value.contains(rule_value),
        }
    };

    key_ok && value_ok
}
