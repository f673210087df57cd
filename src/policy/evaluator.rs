//! Rule evaluation engine.
//!
//! Applies a full [`RulesObj`] (whitelist + blacklist + mode) over a set of
//! observed fields, and combines the header, cookie, body and URL-segment
//! evaluations of an endpoint into a single allow/deny verdict. The ordering
//! is fixed: the blacklist dominates every mode, then the mode decides what
//! the whitelist requires.

use super::config::{BodyRules, DirectionRules, ListKind, Mode, Rule, RuleKind, RulesObj, UrlRule};
use super::matcher::rule_matches;

/// Result of evaluating rules against a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny,
}

impl Verdict {
    pub fn is_allow(self) -> bool {
        self == Verdict::Allow
    }
}

/// An observed `(name, value)` field.
pub type Field = (String, String);

/// The fields of one request, grouped the way the rule families consume them.
#[derive(Debug, Default)]
pub struct RequestFields {
    /// One entry per header value.
    pub headers: Vec<Field>,
    /// One entry per cookie.
    pub cookies: Vec<Field>,
    /// Body multimap; `None` when the body could not be parsed, in which
    /// case body rules are skipped entirely.
    pub body: Option<super::body::BodyFields>,
    /// Values captured by `$$` wildcards in the endpoint path.
    pub url_values: Vec<String>,
}

/// Prefix that lifts a body rule into the URL rule set.
const URL_RULE_PREFIX: &str = "url_";

/// Evaluate one rule family over its observed fields.
///
/// 1. Any blacklist hit on any field denies, regardless of mode.
/// 2. `Off`: allow.
///    `Whitelist` with a non-empty whitelist: some field must match some
///    whitelist rule. An empty whitelist is inert.
///    `Blacklist`: every field must match some whitelist rule; an empty
///    field set allows.
pub fn evaluate_rules(rules: &RulesObj, fields: &[Field]) -> Verdict {
    for rule in &rules.blacklist {
        for (key, value) in fields {
            if rule_matches(rule, key, value) {
                return Verdict::Deny;
            }
        }
    }

    match rules.mode {
        Mode::Off => Verdict::Allow,
        Mode::Whitelist => {
            if rules.whitelist.is_empty() {
                return Verdict::Allow;
            }
            let any_match = rules.whitelist.iter().any(|rule| {
                fields
                    .iter()
                    .any(|(key, value)| rule_matches(rule, key, value))
            });
            if any_match {
                Verdict::Allow
            } else {
                Verdict::Deny
            }
        }
        Mode::Blacklist => {
            let all_whitelisted = fields.iter().all(|(key, value)| {
                rules
                    .whitelist
                    .iter()
                    .any(|rule| rule_matches(rule, key, value))
            });
            if all_whitelisted {
                Verdict::Allow
            } else {
                Verdict::Deny
            }
        }
    }
}

/// Evaluate the full request rule set of an endpoint.
///
/// Headers, cookies, body and URL segments are evaluated independently; the
/// request is allowed iff every family allows it.
pub fn evaluate_request(rules: &DirectionRules, fields: &RequestFields) -> Verdict {
    if !evaluate_rules(&rules.headers, &fields.headers).is_allow() {
        return Verdict::Deny;
    }
    if !evaluate_rules(&rules.cookies, &fields.cookies).is_allow() {
        return Verdict::Deny;
    }

    if let Some(body_fields) = &fields.body {
        let flattened: Vec<Field> = body_fields
            .iter()
            .flat_map(|(key, values)| values.iter().map(|v| (key.clone(), v.clone())))
            .collect();
        if !evaluate_rules(&body_rules_without_lifted(&rules.body), &flattened).is_allow() {
            return Verdict::Deny;
        }
    }

    if !evaluate_url_rules(&rules.body, &fields.url_values).is_allow() {
        return Verdict::Deny;
    }

    Verdict::Allow
}

/// Body rules with the `url_`-prefixed entries removed; those are promoted
/// into the URL rule set instead.
fn body_rules_without_lifted(body: &BodyRules) -> RulesObj {
    let keep = |rule: &&Rule| !is_lifted(rule);
    RulesObj {
        whitelist: body.rules.whitelist.iter().filter(keep).cloned().collect(),
        blacklist: body.rules.blacklist.iter().filter(keep).cloned().collect(),
        mode: body.rules.mode,
    }
}

fn is_lifted(rule: &Rule) -> bool {
    rule.key.trim().starts_with(URL_RULE_PREFIX)
}

/// Merge the declared URL rules with the legacy `url_`-prefixed body rules.
fn collect_url_rules(body: &BodyRules) -> Vec<UrlRule> {
    let mut rules = body.url_rules.clone();
    for (list, list_type) in [
        (&body.rules.whitelist, ListKind::Whitelist),
        (&body.rules.blacklist, ListKind::Blacklist),
    ] {
        for rule in list.iter().filter(|r| is_lifted(r)) {
            rules.push(UrlRule {
                value: rule.value.clone(),
                rule_type: rule.rule_type,
                list_type,
            });
        }
    }
    rules
}

/// Evaluate URL rules against the captured wildcard values, blacklist first.
/// When whitelist URL rules exist, every captured value must match one.
fn evaluate_url_rules(body: &BodyRules, values: &[String]) -> Verdict {
    let rules = collect_url_rules(body);
    if rules.is_empty() {
        return Verdict::Allow;
    }

    for rule in rules.iter().filter(|r| r.list_type == ListKind::Blacklist) {
        if values.iter().any(|v| url_rule_matches(rule, v)) {
            return Verdict::Deny;
        }
    }

    let whitelist: Vec<&UrlRule> = rules
        .iter()
        .filter(|r| r.list_type == ListKind::Whitelist)
        .collect();
    if whitelist.is_empty() {
        return Verdict::Allow;
    }

    let all_whitelisted = values
        .iter()
        .all(|v| whitelist.iter().any(|rule| url_rule_matches(rule, v)));
    if all_whitelisted {
        Verdict::Allow
    } else {
        Verdict::Deny
    }
}

fn url_rule_matches(rule: &UrlRule, value: &str) -> bool {
    let pattern = rule.value.trim();
    if pattern.is_empty() {
        return false;
    }
    match rule.rule_type {
        RuleKind::Regex => match regex::Regex::new(pattern) {
            Ok(re) => re.is_match(value),
            Err(_) => false,
        },
        RuleKind::Value => value.contains(pattern),
    }
}
