//! Risk levels, gate decisions and the per-event intervention result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::action::{ActionEvent, ActionType};
use super::agent::AgentState;

/// Risk level derived from an aggregate risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// What the gate tells the caller to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Warn,
    Block,
}

impl Decision {
    /// Warn and Block count as interventions.
    pub fn is_intervention(self) -> bool {
        matches!(self, Self::Warn | Self::Block)
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allow => write!(f, "allow"),
            Self::Warn => write!(f, "warn"),
            Self::Block => write!(f, "block"),
        }
    }
}

/// One pattern that matched an event, with its scoring evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub pattern_id: String,
    pub category: String,
    pub weight: f64,
    /// Bucketed match strength (0.6 / 0.85 / 1.0 by default).
    pub match_score: f64,
    /// `weight * match_score`.
    pub contribution: f64,
    /// Historical confirmations at evaluation time.
    pub match_count: u64,
    pub alternative: String,
}

/// The outcome of evaluating one action event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionResult {
    pub evaluation_id: Uuid,
    pub agent_id: String,
    pub action_type: ActionType,
    pub target: String,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    /// Highest contribution first.
    pub matched_patterns: Vec<PatternMatch>,
    pub decision: Decision,
    pub alternatives: Vec<String>,
    /// State whose policy produced the decision.
    pub agent_state: AgentState,
    /// Set when evaluation failed and the gate failed open.
    #[serde(default)]
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded_reason: Option<String>,
    pub evaluated_at: DateTime<Utc>,
}

impl InterventionResult {
    /// Fail-open result for an evaluation that could not complete.
    pub fn degraded(event: &ActionEvent, agent_state: AgentState, reason: impl Into<String>) -> Self {
        Self {
            evaluation_id: Uuid::new_v4(),
            agent_id: event.agent_id.clone(),
            action_type: event.action_type,
            target: event.target.clone(),
            risk_score: 0.0,
            risk_level: RiskLevel::Low,
            matched_patterns: Vec::new(),
            decision: Decision::Allow,
            alternatives: Vec::new(),
            agent_state,
            degraded: true,
            degraded_reason: Some(reason.into()),
            evaluated_at: Utc::now(),
        }
    }

    /// Whether this result counts against the agent.
    ///
    /// Degraded results never do.
    pub fn is_flagged(&self) -> bool {
        !self.degraded && self.decision.is_intervention()
    }

    /// Clean means allowed with nothing matched.
    pub fn is_clean(&self) -> bool {
        !self.degraded && self.decision == Decision::Allow && self.matched_patterns.is_empty()
    }
}
