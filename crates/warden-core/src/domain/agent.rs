//! Per-agent compliance state.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::intervention::{Decision, InterventionResult};

/// Escalation state of an agent, least severe first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    #[default]
    Unrestricted,
    Watched,
    Probation,
    Restricted,
}

impl AgentState {
    /// One level less severe. Unrestricted stays put.
    pub fn improved(self) -> Self {
        match self {
            Self::Unrestricted | Self::Watched => Self::Unrestricted,
            Self::Probation => Self::Watched,
            Self::Restricted => Self::Probation,
        }
    }

    /// The more severe of two states.
    pub fn worst(self, other: Self) -> Self {
        self.max(other)
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unrestricted => write!(f, "unrestricted"),
            Self::Watched => write!(f, "watched"),
            Self::Probation => write!(f, "probation"),
            Self::Restricted => write!(f, "restricted"),
        }
    }
}

/// Compliance record for one agent.
///
/// `state` is a cache of the value derived from `history` and
/// `compliance_score`; it is recomputed after every update and after load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: String,
    pub compliance_score: f64,
    pub state: AgentState,
    pub intervention_count: u64,
    /// Oldest first.
    pub history: VecDeque<InterventionResult>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl AgentRecord {
    pub fn new(agent_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            agent_id: agent_id.into(),
            compliance_score: 1.0,
            state: AgentState::Unrestricted,
            intervention_count: 0,
            history: VecDeque::new(),
            first_seen: now,
            last_seen: now,
        }
    }

    /// Append a result, evicting the oldest entries beyond `capacity`.
    pub fn record(&mut self, result: InterventionResult, capacity: usize) {
        if result.is_flagged() {
            self.intervention_count += 1;
        }
        if result.evaluated_at > self.last_seen {
            self.last_seen = result.evaluated_at;
        }
        self.history.push_back(result);
        self.truncate_history(capacity);
    }

    /// Drop the oldest entries until at most `capacity` remain.
    pub fn truncate_history(&mut self, capacity: usize) {
        let excess = self.history.len().saturating_sub(capacity.max(1));
        self.history.drain(..excess);
    }

    /// Flagged results among the last `window` entries.
    pub fn flags_in_window(&self, window: usize) -> usize {
        self.history
            .iter()
            .rev()
            .take(window)
            .filter(|r| r.is_flagged())
            .count()
    }

    /// Number of trailing non-degraded entries that are not flagged.
    pub fn clean_streak(&self) -> usize {
        self.history
            .iter()
            .rev()
            .filter(|r| !r.degraded)
            .take_while(|r| !r.is_flagged())
            .count()
    }

    pub fn count_decisions(&self, decision: Decision) -> usize {
        self.history
            .iter()
            .filter(|r| !r.degraded && r.decision == decision)
            .count()
    }

    /// The most recent `n` results, newest last.
    pub fn recent(&self, n: usize) -> Vec<InterventionResult> {
        let skip = self.history.len().saturating_sub(n);
        self.history.iter().skip(skip).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::action::{ActionEvent, ActionType};

    fn flagged() -> InterventionResult {
        let event = ActionEvent::new("a1", ActionType::Create, "x.py");
        let mut r = InterventionResult::degraded(&event, AgentState::Unrestricted, "test");
        r.degraded = false;
        r.degraded_reason = None;
        r.decision = Decision::Warn;
        r
    }

    fn clean() -> InterventionResult {
        let mut r = flagged();
        r.decision = Decision::Allow;
        r
    }

    #[test]
    fn state_ordering_and_improvement() {
        assert!(AgentState::Unrestricted < AgentState::Restricted);
        assert_eq!(AgentState::Restricted.improved(), AgentState::Probation);
        assert_eq!(AgentState::Unrestricted.improved(), AgentState::Unrestricted);
        assert_eq!(
            AgentState::Watched.worst(AgentState::Probation),
            AgentState::Probation
        );
    }

    #[test]
    fn history_is_bounded() {
        let mut rec = AgentRecord::new("a1", Utc::now());
        for _ in 0..5 {
            rec.record(flagged(), 3);
        }
        assert_eq!(rec.history.len(), 3);
        assert_eq!(rec.intervention_count, 5);
    }

    #[test]
    fn streak_and_window_counts() {
        let mut rec = AgentRecord::new("a1", Utc::now());
        rec.record(flagged(), 10);
        rec.record(clean(), 10);
        rec.record(clean(), 10);
        assert_eq!(rec.clean_streak(), 2);
        assert_eq!(rec.flags_in_window(2), 0);
        assert_eq!(rec.flags_in_window(3), 1);
        assert_eq!(rec.count_decisions(Decision::Warn), 1);
        assert_eq!(rec.recent(2).len(), 2);
    }
}
