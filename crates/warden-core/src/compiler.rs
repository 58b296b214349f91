//! Compiles raw violation records into deduplicated patterns.
//!
//! Compilation is a pure function of the current [`PatternStore`] and a
//! batch of records: it returns the next store and a [`CompileReport`].
//! Malformed records are skipped and reported, never fatal.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::CompilerConfig;
use crate::domain::{
    pattern_id, ActionType, Provenance, Result, TargetRule, ViolationPattern, WardenError,
};
use crate::store::{PatternStore, UpsertOutcome};

static CONTAINMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:must|should)\s+(?:reside|live|be\s+placed|be\s+located|be\s+kept|go)\s+(?:under|in|inside|within)\s+[`'\x22]?([a-z0-9_.\-/]+)[`'\x22]?",
    )
    .expect("valid containment regex")
});
static AFFIX_BEFORE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(prefix|suffix)(?:ed)?\s+(?:with\s+)?[`'\x22]([a-z0-9_.\-]+)[`'\x22]")
        .expect("valid affix regex")
});
static AFFIX_AFTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[`'\x22]([a-z0-9_.\-]+)[`'\x22]\s+(prefix|suffix)\b")
        .expect("valid trailing affix regex")
});

// ---------------------------------------------------------------------------
// Records and reports
// ---------------------------------------------------------------------------

/// A historical violation as handed over by ingestion tooling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawViolationRecord {
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_rule: Option<TargetRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<BTreeSet<ActionType>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternative: Option<String>,
}

/// Why a record produced no pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    MissingCategory,
    UnrecoverableTarget,
    InvalidWeight(f64),
    EmptyRule,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingCategory => write!(f, "missing category"),
            Self::UnrecoverableTarget => write!(f, "no target rule could be derived"),
            Self::InvalidWeight(w) => write!(f, "weight {w} outside [0, 1]"),
            Self::EmptyRule => write!(f, "target rule has an empty matcher"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedRecord {
    /// Position in the submitted batch.
    pub index: usize,
    pub record: RawViolationRecord,
    pub reason: SkipReason,
}

/// Outcome of one compilation batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompileReport {
    pub added: usize,
    pub updated: usize,
    pub skipped: Vec<SkippedRecord>,
    /// Version of the store produced by this batch.
    pub version: u64,
    pub total_patterns: usize,
}

impl CompileReport {
    pub fn is_partial(&self) -> bool {
        !self.skipped.is_empty()
    }
}

// ---------------------------------------------------------------------------
// PatternCompiler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct PatternCompiler {
    config: CompilerConfig,
}

impl PatternCompiler {
    pub fn new(config: CompilerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Compile `records` on top of `current`.
    ///
    /// `cancel` is checked before each record; once set, the batch is
    /// abandoned with [`WardenError::RefreshCancelled`] and nothing is
    /// produced.
    pub fn compile(
        &self,
        current: &PatternStore,
        records: &[RawViolationRecord],
        provenance: Provenance,
        cancel: &AtomicBool,
    ) -> Result<(PatternStore, CompileReport)> {
        let mut builder = current.to_builder();
        let mut report = CompileReport::default();

        for (index, record) in records.iter().enumerate() {
            if cancel.load(Ordering::Relaxed) {
                return Err(WardenError::RefreshCancelled);
            }
            match self.compile_record(record, provenance) {
                Ok(pattern) => match builder.upsert(pattern) {
                    UpsertOutcome::Added => report.added += 1,
                    UpsertOutcome::Updated => report.updated += 1,
                },
                Err(reason) => {
                    tracing::debug!(index, reason = %reason, "skipping violation record");
                    report.skipped.push(SkippedRecord {
                        index,
                        record: record.clone(),
                        reason,
                    });
                }
            }
        }

        let store = builder.build();
        report.version = store.version();
        report.total_patterns = store.len();
        Ok((store, report))
    }

    /// Turn one record into a pattern, or say why it cannot be.
    pub fn compile_record(
        &self,
        record: &RawViolationRecord,
        provenance: Provenance,
    ) -> std::result::Result<ViolationPattern, SkipReason> {
        let category = record.category.trim().to_ascii_lowercase();
        if category.is_empty() {
            return Err(SkipReason::MissingCategory);
        }

        let weight = match record.weight {
            Some(w) if !(w.is_finite() && (0.0..=1.0).contains(&w)) => {
                return Err(SkipReason::InvalidWeight(w))
            }
            Some(w) => w,
            None => self.config.weight_for(&category),
        };

        let (rule, from_query) = match &record.target_rule {
            Some(rule) => {
                let rule = rule.clone().normalized();
                if rule.is_empty() {
                    return Err(SkipReason::EmptyRule);
                }
                let from_query = record.example_path.is_none() && record.example_query.is_some();
                (rule, from_query)
            }
            None => self.derive_rule(record)?,
        };

        let actions = match &record.actions {
            Some(a) if !a.is_empty() => a.clone(),
            _ => default_actions(&rule, from_query),
        };

        let alternative = record
            .alternative
            .clone()
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| default_alternative(&category, &rule));

        Ok(ViolationPattern {
            id: pattern_id(&category, &rule),
            category,
            description: record.description.trim().to_string(),
            actions,
            rule,
            weight,
            alternative,
            provenance,
            match_count: 0,
            last_matched_at: None,
        })
    }

    /// Heuristic extraction. Returns the rule and whether it came from a
    /// query example.
    fn derive_rule(
        &self,
        record: &RawViolationRecord,
    ) -> std::result::Result<(TargetRule, bool), SkipReason> {
        let example_path = record
            .example_path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty());

        if let Some(dir) = containment_dir(&record.description) {
            if let Some((prefix, suffix)) = example_path.and_then(file_selector) {
                let rule = TargetRule::containment(dir, prefix, suffix);
                if !rule.is_empty() {
                    return Ok((rule, false));
                }
            }
        }

        if let Some(rule) = described_affix(&record.description) {
            if !rule.is_empty() {
                return Ok((rule, false));
            }
        }

        if let Some(rule) = example_path.and_then(|p| self.marker_rule(p)) {
            return Ok((rule, false));
        }

        if let Some(query) = record.example_query.as_deref().map(str::trim) {
            if query.chars().count() >= self.config.min_query_len {
                return Ok((TargetRule::substring(query), true));
            }
        }

        Err(SkipReason::UnrecoverableTarget)
    }

    /// A configured duplicate marker at the start or end of the file stem.
    fn marker_rule(&self, path: &str) -> Option<TargetRule> {
        let stem = path_stem(path).to_ascii_lowercase();
        self.config.duplicate_markers.iter().find_map(|marker| {
            let m = marker.trim().to_ascii_lowercase();
            if m.is_empty() {
                None
            } else if m.ends_with('_') && stem.starts_with(&m) {
                Some(TargetRule::prefix(m))
            } else if m.starts_with('_') && stem.ends_with(&m) {
                Some(TargetRule::suffix(m))
            } else {
                None
            }
        })
    }
}

fn containment_dir(description: &str) -> Option<String> {
    let caps = CONTAINMENT_RE.captures(description)?;
    let dir = caps.get(1)?.as_str().trim_end_matches('.');
    (!dir.trim_matches('/').is_empty()).then(|| dir.to_string())
}

fn described_affix(description: &str) -> Option<TargetRule> {
    let (kind, value) = if let Some(c) = AFFIX_BEFORE_RE.captures(description) {
        (c.get(1)?.as_str(), c.get(2)?.as_str())
    } else {
        let c = AFFIX_AFTER_RE.captures(description)?;
        (c.get(2)?.as_str(), c.get(1)?.as_str())
    };
    if kind.eq_ignore_ascii_case("prefix") {
        Some(TargetRule::prefix(value))
    } else {
        Some(TargetRule::suffix(value))
    }
}

/// File selector for a containment rule: the stem up to and including its
/// first `_`, or else the extension as a suffix.
fn file_selector(path: &str) -> Option<(Option<String>, Option<String>)> {
    let name = path.replace('\\', "/");
    let name = name.rsplit('/').next().unwrap_or_default().to_ascii_lowercase();
    let stem = path_stem(&name);
    if let Some(i) = stem.find('_').filter(|i| *i > 0) {
        return Some((Some(stem[..=i].to_string()), None));
    }
    match name.rfind('.') {
        Some(i) if i > 0 && i + 1 < name.len() => Some((None, Some(name[i..].to_string()))),
        _ => None,
    }
}

fn path_stem(path: &str) -> &str {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    match name.rfind('.') {
        Some(0) | None => name,
        Some(i) => &name[..i],
    }
}

fn default_actions(rule: &TargetRule, from_query: bool) -> BTreeSet<ActionType> {
    if from_query {
        BTreeSet::from([ActionType::Query])
    } else if matches!(rule, TargetRule::Containment { .. }) {
        BTreeSet::from([ActionType::Create, ActionType::Modify])
    } else {
        BTreeSet::from([ActionType::Create, ActionType::Query])
    }
}

fn default_alternative(category: &str, rule: &TargetRule) -> String {
    match rule {
        TargetRule::Containment { required_dir, .. } => {
            format!("Place the file under {required_dir}")
        }
        TargetRule::Prefix { .. } | TargetRule::Suffix { .. } if category == "duplication" => {
            "Modify the existing file instead of creating a variant".to_string()
        }
        _ => format!("Review the {category} guideline before proceeding"),
    }
}

// ---------------------------------------------------------------------------
// Built-in records
// ---------------------------------------------------------------------------

/// Records compiled with [`Provenance::BuiltIn`] at startup and whenever a
/// persisted snapshot cannot be used.
pub fn builtin_records(config: &CompilerConfig) -> Vec<RawViolationRecord> {
    let mut records: Vec<RawViolationRecord> = config
        .duplicate_markers
        .iter()
        .map(|m| m.trim())
        .filter(|m| !m.is_empty())
        .map(|marker| {
            let description = if marker.starts_with('_') {
                format!("Files with the suffix `{marker}` duplicate an existing module")
            } else {
                format!("Files prefixed with `{marker}` duplicate an existing module")
            };
            RawViolationRecord {
                category: "duplication".into(),
                description,
                alternative: Some(
                    "Modify the existing file instead of creating a variant".into(),
                ),
                ..Default::default()
            }
        })
        .collect();

    records.push(RawViolationRecord {
        category: "misplacement".into(),
        description: "Test files must reside under `tests/`".into(),
        example_path: Some("src/test_parser.py".into()),
        alternative: Some("Move the test into tests/".into()),
        ..Default::default()
    });
    records.push(RawViolationRecord {
        category: "misplacement".into(),
        description: "Documentation drafts must be placed in `docs/`".into(),
        example_path: Some("draft_architecture.md".into()),
        alternative: Some("Write the document under docs/".into()),
        ..Default::default()
    });
    records
}
