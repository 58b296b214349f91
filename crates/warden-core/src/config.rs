//! Engine configuration.
//!
//! Every tunable constant lives here. Configuration is layered: built-in
//! defaults, then an optional TOML file, then `WARDEN_*` environment
//! overrides, then [`EngineConfig::validate`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{MatchKind, RiskLevel};
use crate::gate::GatePolicy;

/// Errors produced while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: String, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Match-score buckets and risk-level thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub fuzzy_score: f64,
    pub affix_score: f64,
    pub exact_score: f64,
    /// Scores at or above this are Medium.
    pub medium_threshold: f64,
    /// Scores at or above this are High.
    pub high_threshold: f64,
    /// Scores at or above this are Critical.
    pub critical_threshold: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            fuzzy_score: 0.6,
            affix_score: 0.85,
            exact_score: 1.0,
            medium_threshold: 0.30,
            high_threshold: 0.60,
            critical_threshold: 0.85,
        }
    }
}

impl ScoringConfig {
    pub fn score_for(&self, kind: MatchKind) -> f64 {
        match kind {
            MatchKind::None => 0.0,
            MatchKind::Fuzzy => self.fuzzy_score,
            MatchKind::Affix => self.affix_score,
            MatchKind::Exact => self.exact_score,
        }
    }

    pub fn level_for(&self, risk_score: f64) -> RiskLevel {
        if risk_score >= self.critical_threshold {
            RiskLevel::Critical
        } else if risk_score >= self.high_threshold {
            RiskLevel::High
        } else if risk_score >= self.medium_threshold {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// History bounds and state-derivation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub history_capacity: usize,
    /// Recent entries considered when counting Block/Warn decisions.
    pub flag_window: usize,
    /// Flags within the window that move an agent to Probation.
    pub probation_flags: usize,
    /// Trailing clean entries that earn a one-level improvement.
    pub recovery_window: usize,
    pub unrestricted_floor: f64,
    pub watched_floor: f64,
    pub probation_floor: f64,
    pub policy: GatePolicy,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            history_capacity: 200,
            flag_window: 20,
            probation_flags: 3,
            recovery_window: 10,
            unrestricted_floor: 0.8,
            watched_floor: 0.6,
            probation_floor: 0.4,
            policy: GatePolicy::standard(),
        }
    }
}

/// Compliance-score penalties and rewards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub penalty_critical: f64,
    pub penalty_high: f64,
    pub penalty_medium: f64,
    pub penalty_low: f64,
    pub clean_reward: f64,
    /// Results included in `AgentReport::recent`.
    pub report_recent: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            penalty_critical: 0.10,
            penalty_high: 0.05,
            penalty_medium: 0.02,
            penalty_low: 0.0,
            clean_reward: 0.01,
            report_recent: 10,
        }
    }
}

impl TrackerConfig {
    pub fn penalty_for(&self, level: RiskLevel) -> f64 {
        match level {
            RiskLevel::Critical => self.penalty_critical,
            RiskLevel::High => self.penalty_high,
            RiskLevel::Medium => self.penalty_medium,
            RiskLevel::Low => self.penalty_low,
        }
    }
}

/// Heuristics and default weights used when compiling records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Category -> default weight.
    pub severity: BTreeMap<String, f64>,
    pub default_weight: f64,
    /// File-name markers that indicate a duplicate was created.
    pub duplicate_markers: Vec<String>,
    pub min_query_len: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        let severity = [("misplacement", 0.9), ("duplication", 0.85)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let duplicate_markers = [
            "enhanced_", "improved_", "new_", "_v2", "_new", "_copy", "_backup", "_old",
            "_fixed", "_final",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        Self {
            severity,
            default_weight: 0.4,
            duplicate_markers,
            min_query_len: 3,
        }
    }
}

impl CompilerConfig {
    pub fn weight_for(&self, category: &str) -> f64 {
        self.severity
            .get(&category.trim().to_ascii_lowercase())
            .copied()
            .unwrap_or(self.default_weight)
    }
}

/// Snapshot slot and flush cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub slot: String,
    pub flush_interval_secs: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            slot: "default".to_string(),
            flush_interval_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scoring: ScoringConfig,
    pub gate: GateConfig,
    pub tracker: TrackerConfig,
    pub compiler: CompilerConfig,
    pub persistence: PersistenceConfig,
    pub query_log_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scoring: ScoringConfig::default(),
            gate: GateConfig::default(),
            tracker: TrackerConfig::default(),
            compiler: CompilerConfig::default(),
            persistence: PersistenceConfig::default(),
            query_log_capacity: 500,
        }
    }
}

impl EngineConfig {
    /// Defaults, then `path` if given, then environment, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p).map_err(|source| ConfigError::Read {
                    path: p.to_path_buf(),
                    source,
                })?;
                Self::from_toml(&text)?
            }
            None => Self::default(),
        };
        config.apply_env_overrides_from(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `WARDEN_*` overrides using `lookup` to read variables.
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("WARDEN_SNAPSHOT_SLOT") {
            self.persistence.slot = v;
        }
        if let Some(v) = parse_env(&lookup, "WARDEN_FLUSH_INTERVAL_SECS")? {
            self.persistence.flush_interval_secs = v;
        }
        if let Some(v) = parse_env(&lookup, "WARDEN_HISTORY_CAPACITY")? {
            self.gate.history_capacity = v;
        }
        if let Some(v) = parse_env(&lookup, "WARDEN_QUERY_LOG_CAPACITY")? {
            self.query_log_capacity = v;
        }
        if let Some(v) = parse_env(&lookup, "WARDEN_DEFAULT_WEIGHT")? {
            self.compiler.default_weight = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.scoring;
        let thresholds = [s.medium_threshold, s.high_threshold, s.critical_threshold];
        if thresholds.iter().any(|t| !(*t > 0.0 && *t <= 1.0)) {
            return Err(ConfigError::Invalid(
                "risk thresholds must lie in (0, 1]".into(),
            ));
        }
        if !(s.medium_threshold < s.high_threshold && s.high_threshold < s.critical_threshold) {
            return Err(ConfigError::Invalid(
                "risk thresholds must be strictly increasing".into(),
            ));
        }

        let unit = [
            ("scoring.fuzzy_score", s.fuzzy_score),
            ("scoring.affix_score", s.affix_score),
            ("scoring.exact_score", s.exact_score),
            ("tracker.penalty_critical", self.tracker.penalty_critical),
            ("tracker.penalty_high", self.tracker.penalty_high),
            ("tracker.penalty_medium", self.tracker.penalty_medium),
            ("tracker.penalty_low", self.tracker.penalty_low),
            ("tracker.clean_reward", self.tracker.clean_reward),
            ("gate.unrestricted_floor", self.gate.unrestricted_floor),
            ("gate.watched_floor", self.gate.watched_floor),
            ("gate.probation_floor", self.gate.probation_floor),
            ("compiler.default_weight", self.compiler.default_weight),
        ];
        for (name, value) in unit {
            check_unit(name, value)?;
        }
        for (category, weight) in &self.compiler.severity {
            check_unit(&format!("compiler.severity.{category}"), *weight)?;
        }

        let windows = [
            ("gate.history_capacity", self.gate.history_capacity),
            ("gate.flag_window", self.gate.flag_window),
            ("gate.probation_flags", self.gate.probation_flags),
            ("gate.recovery_window", self.gate.recovery_window),
            ("tracker.report_recent", self.tracker.report_recent),
            ("query_log_capacity", self.query_log_capacity),
        ];
        for (name, value) in windows {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
            }
        }
        if !self.gate.policy.is_consistent() {
            return Err(ConfigError::Invalid(
                "gate.policy warn thresholds must not exceed block thresholds".into(),
            ));
        }
        if self.gate.unrestricted_floor < self.gate.watched_floor
            || self.gate.watched_floor < self.gate.probation_floor
        {
            return Err(ConfigError::Invalid(
                "gate floors must decrease from unrestricted to probation".into(),
            ));
        }
        if self.persistence.flush_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "persistence.flush_interval_secs must be non-zero".into(),
            ));
        }
        if self.persistence.slot.trim().is_empty() {
            return Err(ConfigError::Invalid("persistence.slot must not be empty".into()));
        }
        Ok(())
    }
}

fn check_unit(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{name} must lie in [0, 1], got {value}"
        )))
    }
}

fn parse_env<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                key: key.to_string(),
                value: raw,
            }),
    }
}
