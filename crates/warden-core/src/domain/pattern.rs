//! Violation patterns and the target matchers they carry.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::action::ActionType;

/// Where a pattern came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Shipped with the engine.
    BuiltIn,
    /// Compiled from ingested violation records.
    Learned,
}

/// Strength of a single rule match, before it is mapped to a numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchKind {
    None,
    /// Marker found somewhere other than its expected position.
    Fuzzy,
    /// Prefix or suffix hit.
    Affix,
    /// The rule is violated exactly.
    Exact,
}

/// How a pattern recognises its target.
///
/// Comparisons are ASCII-case-insensitive and path separators are normalised
/// to `/` before matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetRule {
    /// File name starts with `value` (e.g. `enhanced_`).
    Prefix { value: String },
    /// File stem or name ends with `value` (e.g. `_v2`).
    Suffix { value: String },
    /// Path or text contains `value` anywhere.
    Substring { value: String },
    /// File name equals `value`.
    Exact { value: String },
    /// Files selected by prefix/suffix must live under `required_dir`.
    Containment {
        required_dir: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_prefix: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_suffix: Option<String>,
    },
}

impl TargetRule {
    pub fn prefix(value: impl Into<String>) -> Self {
        Self::Prefix {
            value: value.into().to_ascii_lowercase(),
        }
    }

    pub fn suffix(value: impl Into<String>) -> Self {
        Self::Suffix {
            value: value.into().to_ascii_lowercase(),
        }
    }

    pub fn substring(value: impl Into<String>) -> Self {
        Self::Substring {
            value: value.into().to_ascii_lowercase(),
        }
    }

    pub fn exact(value: impl Into<String>) -> Self {
        Self::Exact {
            value: value.into().to_ascii_lowercase(),
        }
    }

    pub fn containment(
        required_dir: impl Into<String>,
        file_prefix: Option<String>,
        file_suffix: Option<String>,
    ) -> Self {
        Self::Containment {
            required_dir: normalize_dir(&required_dir.into()),
            file_prefix: file_prefix.map(|p| p.to_ascii_lowercase()),
            file_suffix: file_suffix.map(|s| s.to_ascii_lowercase()),
        }
    }

    /// Lower-case and normalise matcher strings so equal rules hash equally.
    pub fn normalized(self) -> Self {
        match self {
            Self::Prefix { value } => Self::prefix(value.trim()),
            Self::Suffix { value } => Self::suffix(value.trim()),
            Self::Substring { value } => Self::substring(value.trim()),
            Self::Exact { value } => Self::exact(value.trim()),
            Self::Containment {
                required_dir,
                file_prefix,
                file_suffix,
            } => Self::containment(
                required_dir,
                file_prefix.map(|p| p.trim().to_string()).filter(|p| !p.is_empty()),
                file_suffix.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            ),
        }
    }

    /// Whether the matcher has nothing to match on.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Prefix { value }
            | Self::Suffix { value }
            | Self::Substring { value }
            | Self::Exact { value } => value.is_empty(),
            Self::Containment {
                required_dir,
                file_prefix,
                file_suffix,
            } => required_dir.is_empty() || (file_prefix.is_none() && file_suffix.is_none()),
        }
    }

    /// Stable textual form used for hashing and display.
    pub fn canonical(&self) -> String {
        match self {
            Self::Prefix { value } => format!("prefix:{value}"),
            Self::Suffix { value } => format!("suffix:{value}"),
            Self::Substring { value } => format!("substring:{value}"),
            Self::Exact { value } => format!("exact:{value}"),
            Self::Containment {
                required_dir,
                file_prefix,
                file_suffix,
            } => format!(
                "containment:{}|{}|{}",
                required_dir,
                file_prefix.as_deref().unwrap_or(""),
                file_suffix.as_deref().unwrap_or("")
            ),
        }
    }

    /// Match a filesystem path.
    pub fn match_path(&self, path: &str) -> MatchKind {
        let path = normalize_path(path);
        let name = file_name(&path);
        let stem = file_stem(name);

        match self {
            Self::Prefix { value } => {
                if name.starts_with(value.as_str()) {
                    MatchKind::Affix
                } else if name.contains(value.as_str()) {
                    MatchKind::Fuzzy
                } else {
                    MatchKind::None
                }
            }
            Self::Suffix { value } => {
                if stem.ends_with(value.as_str()) || name.ends_with(value.as_str()) {
                    MatchKind::Affix
                } else if name.contains(value.as_str()) {
                    MatchKind::Fuzzy
                } else {
                    MatchKind::None
                }
            }
            Self::Substring { value } => {
                if path.contains(value.as_str()) {
                    MatchKind::Fuzzy
                } else {
                    MatchKind::None
                }
            }
            Self::Exact { value } => {
                if name == value.as_str() || path == *value {
                    MatchKind::Exact
                } else {
                    MatchKind::None
                }
            }
            Self::Containment {
                required_dir,
                file_prefix,
                file_suffix,
            } => {
                let selected = file_prefix
                    .as_deref()
                    .is_some_and(|p| name.starts_with(p))
                    || file_suffix
                        .as_deref()
                        .is_some_and(|s| stem.ends_with(s) || name.ends_with(s));
                if selected && !is_under(&path, required_dir) {
                    MatchKind::Exact
                } else {
                    MatchKind::None
                }
            }
        }
    }

    /// Match free text: every token is tried as a path, and substring rules
    /// also see the whole text. The strongest match wins.
    pub fn match_text(&self, text: &str) -> MatchKind {
        let whole = match self {
            Self::Substring { value } if text.to_ascii_lowercase().contains(value.as_str()) => {
                MatchKind::Fuzzy
            }
            _ => MatchKind::None,
        };
        text.split_whitespace()
            .map(clean_token)
            .filter(|t| !t.is_empty())
            .map(|t| self.match_path(t))
            .fold(whole, MatchKind::max)
    }

    /// Match a target according to the action kind.
    pub fn match_target(&self, action: ActionType, target: &str) -> MatchKind {
        if action.targets_path() {
            self.match_path(target)
        } else {
            self.match_text(target)
        }
    }
}

impl std::fmt::Display for TargetRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// Stable pattern id: first 16 hex chars of SHA-256 over category + rule.
pub fn pattern_id(category: &str, rule: &TargetRule) -> String {
    let mut hasher = Sha256::new();
    hasher.update(category.trim().to_ascii_lowercase().as_bytes());
    hasher.update([0x1f]);
    hasher.update(rule.canonical().as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

/// A learned or built-in rule describing a class of prohibited action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationPattern {
    pub id: String,
    pub category: String,
    #[serde(default)]
    pub description: String,
    /// Action kinds this pattern applies to.
    pub actions: BTreeSet<ActionType>,
    pub rule: TargetRule,
    /// Severity in 0.0–1.0.
    pub weight: f64,
    /// Suggested remediation.
    #[serde(default)]
    pub alternative: String,
    pub provenance: Provenance,
    #[serde(default)]
    pub match_count: u64,
    #[serde(default)]
    pub last_matched_at: Option<DateTime<Utc>>,
}

impl ViolationPattern {
    pub fn applies_to(&self, action: ActionType) -> bool {
        self.actions.contains(&action)
    }
}

fn normalize_path(path: &str) -> String {
    let p = path.trim().replace('\\', "/").to_ascii_lowercase();
    p.strip_prefix("./").map(str::to_string).unwrap_or(p)
}

fn normalize_dir(dir: &str) -> String {
    let d = normalize_path(dir);
    let d = d.trim_matches('/');
    if d.is_empty() {
        String::new()
    } else {
        format!("{d}/")
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn file_stem(name: &str) -> &str {
    match name.rfind('.') {
        Some(0) | None => name,
        Some(i) => &name[..i],
    }
}

fn is_under(path: &str, dir: &str) -> bool {
    path.starts_with(dir) || path.contains(&format!("/{dir}"))
}

fn clean_token(token: &str) -> &str {
    const PUNCT: &str = "\"'`,;:()[]{}<>!?";
    token
        .trim_start_matches(|c: char| PUNCT.contains(c))
        .trim_end_matches(|c: char| c == '.' || PUNCT.contains(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_matches_file_name_not_directory() {
        let rule = TargetRule::prefix("enhanced_");
        assert_eq!(rule.match_path("src/enhanced_commands.py"), MatchKind::Affix);
        assert_eq!(rule.match_path("ENHANCED_x.py"), MatchKind::Affix);
        assert_eq!(rule.match_path("src/my_enhanced_cmd.py"), MatchKind::Fuzzy);
        assert_eq!(rule.match_path("enhanced_dir/commands.py"), MatchKind::None);
    }

    #[test]
    fn suffix_matches_stem_or_name() {
        let rule = TargetRule::suffix("_v2");
        assert_eq!(rule.match_path("lib/utils_v2.py"), MatchKind::Affix);
        assert_eq!(rule.match_path("lib/utils_v2_final.py"), MatchKind::Fuzzy);
        assert_eq!(rule.match_path("lib/utils.py"), MatchKind::None);
    }

    #[test]
    fn exact_and_substring() {
        assert_eq!(
            TargetRule::exact("setup.py").match_path("pkg\\setup.py"),
            MatchKind::Exact
        );
        assert_eq!(
            TargetRule::substring("backup").match_path("old/backup_2024/a.txt"),
            MatchKind::Fuzzy
        );
    }

    #[test]
    fn containment_violated_outside_required_dir() {
        let rule = TargetRule::containment("tests", Some("test_".into()), None);
        assert_eq!(rule.match_path("src/test_parser.py"), MatchKind::Exact);
        assert_eq!(rule.match_path("tests/test_parser.py"), MatchKind::None);
        assert_eq!(rule.match_path("/repo/tests/unit/test_parser.py"), MatchKind::None);
        assert_eq!(rule.match_path("src/parser.py"), MatchKind::None);
    }

    #[test]
    fn text_matching_uses_tokens() {
        let rule = TargetRule::prefix("enhanced_");
        assert_eq!(
            rule.match_text("please create `enhanced_commands.py`."),
            MatchKind::Affix
        );
        assert_eq!(rule.match_text("nothing relevant here"), MatchKind::None);

        let sub = TargetRule::substring("copy of");
        assert_eq!(sub.match_text("make a Copy Of main.rs"), MatchKind::Fuzzy);
    }

    #[test]
    fn pattern_id_is_stable_and_case_insensitive() {
        let a = pattern_id("Duplication", &TargetRule::prefix("enhanced_"));
        let b = pattern_id("duplication ", &TargetRule::prefix("ENHANCED_"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, pattern_id("duplication", &TargetRule::suffix("enhanced_")));
    }

    #[test]
    fn empty_rules_detected() {
        assert!(TargetRule::prefix("").is_empty());
        assert!(TargetRule::containment("tests", None, None).is_empty());
        assert!(!TargetRule::containment("tests", None, Some(".md".into())).is_empty());
    }

    #[test]
    fn rule_serde_shape() {
        let rule = TargetRule::prefix("new_");
        let json = serde_json::to_string(&rule).unwrap();
        assert_eq!(json, r#"{"kind":"prefix","value":"new_"}"#);
    }
}
