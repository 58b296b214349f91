//! Intervention gate.
//!
//! Applies the agent-state-aware policy table to an [`Evaluation`], produces
//! the [`InterventionResult`], and updates the agent's record: score via the
//! [`AgentScoreTracker`], history, and the derived [`AgentState`].

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::GateConfig;
use crate::domain::{
    ActionEvent, AgentRecord, AgentState, Decision, InterventionResult, RiskLevel,
};
use crate::evaluator::Evaluation;
use crate::obs;
use crate::tracker::AgentScoreTracker;

// ---------------------------------------------------------------------------
// Policy table
// ---------------------------------------------------------------------------

/// Thresholds applied while an agent is in one state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePolicy {
    /// Block at or above this level.
    pub block_at: RiskLevel,
    /// Warn at or above this level (below `block_at`). `None` never warns.
    pub warn_at: Option<RiskLevel>,
}

impl StatePolicy {
    pub const fn new(block_at: RiskLevel, warn_at: Option<RiskLevel>) -> Self {
        Self { block_at, warn_at }
    }

    pub fn decide(&self, level: RiskLevel) -> Decision {
        if level >= self.block_at {
            Decision::Block
        } else if self.warn_at.is_some_and(|w| level >= w) {
            Decision::Warn
        } else {
            Decision::Allow
        }
    }
}

/// Block/warn thresholds per agent state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatePolicy {
    pub unrestricted: StatePolicy,
    pub watched: StatePolicy,
    pub probation: StatePolicy,
    pub restricted: StatePolicy,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl GatePolicy {
    /// Stricter thresholds as the agent's state worsens.
    pub fn standard() -> Self {
        Self {
            unrestricted: StatePolicy::new(RiskLevel::Critical, Some(RiskLevel::High)),
            watched: StatePolicy::new(RiskLevel::High, Some(RiskLevel::Medium)),
            probation: StatePolicy::new(RiskLevel::Medium, Some(RiskLevel::Low)),
            restricted: StatePolicy::new(RiskLevel::Low, None),
        }
    }

    /// Only warns, at every state.
    pub fn permissive() -> Self {
        let warn_only = StatePolicy::new(RiskLevel::Critical, Some(RiskLevel::High));
        Self {
            unrestricted: warn_only,
            watched: warn_only,
            probation: warn_only,
            restricted: warn_only,
        }
    }

    pub fn for_state(&self, state: AgentState) -> &StatePolicy {
        match state {
            AgentState::Unrestricted => &self.unrestricted,
            AgentState::Watched => &self.watched,
            AgentState::Probation => &self.probation,
            AgentState::Restricted => &self.restricted,
        }
    }

    /// Decision for `evaluation` under `state`. Nothing matched is always
    /// Allow.
    pub fn decide(&self, state: AgentState, evaluation: &Evaluation) -> Decision {
        if evaluation.matched.is_empty() {
            return Decision::Allow;
        }
        self.for_state(state).decide(evaluation.risk_level)
    }

    /// Every warn threshold must sit below its block threshold.
    pub fn is_consistent(&self) -> bool {
        [
            &self.unrestricted,
            &self.watched,
            &self.probation,
            &self.restricted,
        ]
        .iter()
        .all(|p| p.warn_at.map_or(true, |w| w <= p.block_at))
    }
}

// ---------------------------------------------------------------------------
// State derivation
// ---------------------------------------------------------------------------

/// Derive an agent's state from its recent history and score.
///
/// The flag count in the last `flag_window` entries gives one candidate,
/// improved by one level after `recovery_window` clean entries. The score
/// floors give another. The more severe of the two wins.
pub fn derive_state(record: &AgentRecord, config: &GateConfig) -> AgentState {
    let flags = record.flags_in_window(config.flag_window);
    let mut by_flags = if flags == 0 {
        AgentState::Unrestricted
    } else if flags < config.probation_flags {
        AgentState::Watched
    } else {
        AgentState::Probation
    };
    if flags > 0 && record.clean_streak() >= config.recovery_window {
        by_flags = by_flags.improved();
    }

    let score = record.compliance_score;
    let by_score = if score >= config.unrestricted_floor {
        AgentState::Unrestricted
    } else if score >= config.watched_floor {
        AgentState::Watched
    } else if score >= config.probation_floor {
        AgentState::Probation
    } else {
        AgentState::Restricted
    };

    by_flags.worst(by_score)
}

// ---------------------------------------------------------------------------
// InterventionGate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct InterventionGate {
    config: GateConfig,
}

impl InterventionGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Build the result for `event` without touching any record.
    pub fn result_for(
        &self,
        event: &ActionEvent,
        evaluation: Evaluation,
        state: AgentState,
    ) -> InterventionResult {
        let decision = self.config.policy.decide(state, &evaluation);
        let alternatives = evaluation
            .top()
            .map(|m| m.alternative.trim())
            .filter(|a| !a.is_empty())
            .map(|a| vec![a.to_string()])
            .unwrap_or_default();
        InterventionResult {
            evaluation_id: Uuid::new_v4(),
            agent_id: event.agent_id.clone(),
            action_type: event.action_type,
            target: event.target.clone(),
            risk_score: evaluation.risk_score,
            risk_level: evaluation.risk_level,
            matched_patterns: evaluation.matched,
            decision,
            alternatives,
            agent_state: state,
            degraded: false,
            degraded_reason: None,
            evaluated_at: Utc::now(),
        }
    }

    /// Decide, then update `record`: score, history and state.
    pub fn gate(
        &self,
        record: &mut AgentRecord,
        event: &ActionEvent,
        evaluation: Evaluation,
        tracker: &AgentScoreTracker,
    ) -> InterventionResult {
        let result = self.result_for(event, evaluation, record.state);
        match result.decision {
            Decision::Block | Decision::Warn => {
                tracker.penalize(record, result.risk_level);
            }
            Decision::Allow if result.is_clean() => {
                tracker.reward(record);
            }
            Decision::Allow => {}
        }
        self.record(record, result.clone());
        result
    }

    /// Append `result` to history and re-derive state. Score is untouched.
    pub fn record(&self, record: &mut AgentRecord, result: InterventionResult) {
        record.record(result, self.config.history_capacity);
        self.refresh_state(record);
    }

    /// Recompute the cached state, logging any change.
    pub fn refresh_state(&self, record: &mut AgentRecord) {
        let next = derive_state(record, &self.config);
        if next != record.state {
            obs::emit_state_changed(&record.agent_id, record.state, next, record.compliance_score);
            record.state = next;
        }
    }
}
