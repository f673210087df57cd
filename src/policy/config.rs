//! Policy data model and project-file format.
//!
//! The project file is JSON: `{ currentProject, endpoints[], proxyEnabled? }`.
//! Field names follow the wire format the policy editor writes
//! (`keyRuleType`, `ruleType`, `listType`, `obfuscatedPath`), so files
//! produced by older tooling load unchanged. Unknown top-level fields are
//! preserved on round-trip so that saving the `proxyEnabled` flag never
//! destroys data we do not understand.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// How a rule's `key` or `value` text is interpreted when matching.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum RuleKind {
    /// Case-sensitive regular expression (case-insensitive for keys).
    Regex,
    /// Plain text: case-insensitive equality for keys, case-sensitive
    /// substring containment for values. Unknown strings fall back here.
    #[default]
    Value,
}

impl From<String> for RuleKind {
    fn from(kind: String) -> Self {
        if kind == "regex" {
            RuleKind::Regex
        } else {
            RuleKind::Value
        }
    }
}

/// Which list a URL rule belongs to. Unknown strings fail closed to the
/// blacklist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum ListKind {
    Whitelist,
    #[default]
    Blacklist,
}

impl From<String> for ListKind {
    fn from(kind: String) -> Self {
        if kind == "whitelist" {
            ListKind::Whitelist
        } else {
            ListKind::Blacklist
        }
    }
}

/// Evaluation mode for one rule family (headers, cookies or body).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Mode {
    /// At least one observed field must match a whitelist rule
    /// (inert when the whitelist is empty).
    Whitelist,
    /// Every observed field must match a whitelist rule.
    Blacklist,
    /// Only the blacklist pass applies. Unknown strings fall back here.
    #[default]
    Off,
}

impl From<String> for Mode {
    fn from(mode: String) -> Self {
        match mode.as_str() {
            "whitelist" => Mode::Whitelist,
            "blacklist" => Mode::Blacklist,
            _ => Mode::Off,
        }
    }
}

/// One row of policy: an optional key pattern plus an optional value pattern.
///
/// A rule whose key and value are both empty (after trimming) never matches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Rule {
    pub key: String,
    pub key_rule_type: RuleKind,
    pub value: String,
    pub rule_type: RuleKind,
    /// Editor metadata, opaque to evaluation.
    pub date_added: String,
    /// Editor metadata, opaque to evaluation.
    pub notes: String,
}

/// A whitelist/blacklist pair plus the mode that combines them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RulesObj {
    pub whitelist: Vec<Rule>,
    pub blacklist: Vec<Rule>,
    pub mode: Mode,
}

/// A rule applied to values captured from `$$` wildcards in the request path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UrlRule {
    pub value: String,
    pub rule_type: RuleKind,
    pub list_type: ListKind,
}

/// Body rule family. In addition to the plain whitelist/blacklist, URL rules
/// may be embedded here directly; legacy files instead carry them as body
/// rules with a `url_` key prefix, lifted at evaluation time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyRules {
    #[serde(flatten)]
    pub rules: RulesObj,
    #[serde(default)]
    pub url_rules: Vec<UrlRule>,
}

/// Rule families for one direction of traffic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DirectionRules {
    pub headers: RulesObj,
    pub cookies: RulesObj,
    pub body: BodyRules,
}

/// A declared endpoint: a path pattern plus the rule sets that apply to it.
///
/// `path` is stored normalized (leading `/` stripped) and may contain `$$`
/// wildcards (see [`crate::policy::path`]). Response rules are parsed and
/// retained for the editor but are not evaluated; only the request direction
/// is enforced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Endpoint {
    pub path: String,
    pub obfuscated_path: String,
    pub method: String,
    pub request: DirectionRules,
    pub response: DirectionRules,
}

/// The persisted project file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectFile {
    #[serde(default)]
    pub current_project: String,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_enabled: Option<bool>,
    /// Fields we do not model, preserved verbatim across read-modify-write.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ProjectFile {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: ProjectFile = serde_json::from_str(&content)?;
        Ok(file)
    }
}
