//! Per-agent compliance scores.
//!
//! Each agent's record sits behind its own mutex; the map lock is held only
//! to look up or insert a handle, so different agents never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::TrackerConfig;
use crate::domain::{AgentRecord, AgentState, Decision, InterventionResult, RiskLevel};

/// Shared handle to one agent's record.
pub type AgentHandle = Arc<Mutex<AgentRecord>>;

/// Summary of an agent's compliance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReport {
    pub agent_id: String,
    pub compliance_score: f64,
    pub state: AgentState,
    pub intervention_count: u64,
    pub block_count: usize,
    pub warn_count: usize,
    /// Newest last.
    pub recent: Vec<InterventionResult>,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl AgentReport {
    /// Report for an agent that has never been seen.
    pub fn unknown(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            compliance_score: 1.0,
            state: AgentState::Unrestricted,
            intervention_count: 0,
            block_count: 0,
            warn_count: 0,
            recent: Vec::new(),
            first_seen: None,
            last_seen: None,
        }
    }

    fn from_record(record: &AgentRecord, recent: usize) -> Self {
        Self {
            agent_id: record.agent_id.clone(),
            compliance_score: record.compliance_score,
            state: record.state,
            intervention_count: record.intervention_count,
            block_count: record.count_decisions(Decision::Block),
            warn_count: record.count_decisions(Decision::Warn),
            recent: record.recent(recent),
            first_seen: Some(record.first_seen),
            last_seen: Some(record.last_seen),
        }
    }
}

#[derive(Debug, Default)]
pub struct AgentScoreTracker {
    config: TrackerConfig,
    agents: RwLock<HashMap<String, AgentHandle>>,
}

impl AgentScoreTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            agents: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Handle for `agent_id`, creating a default record on first sight.
    pub fn handle(&self, agent_id: &str) -> AgentHandle {
        if let Some(h) = self.get(agent_id) {
            return h;
        }
        let mut map = self.agents.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(map.entry(agent_id.to_string()).or_insert_with(|| {
            tracing::debug!(agent_id, "tracking new agent");
            Arc::new(Mutex::new(AgentRecord::new(agent_id, Utc::now())))
        }))
    }

    /// Handle for `agent_id` if the agent is known.
    pub fn get(&self, agent_id: &str) -> Option<AgentHandle> {
        self.agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(agent_id)
            .cloned()
    }

    /// Current state, Unrestricted for unknown agents.
    pub fn state_of(&self, agent_id: &str) -> AgentState {
        self.get(agent_id)
            .map(|h| h.lock().unwrap_or_else(PoisonError::into_inner).state)
            .unwrap_or_default()
    }

    /// Subtract the penalty for `level`, floored at zero. Returns the new
    /// score.
    pub fn penalize(&self, record: &mut AgentRecord, level: RiskLevel) -> f64 {
        let score = (record.compliance_score - self.config.penalty_for(level)).max(0.0);
        record.compliance_score = clamp_score(score);
        record.compliance_score
    }

    /// Add the clean-action reward, capped at one. Returns the new score.
    pub fn reward(&self, record: &mut AgentRecord) -> f64 {
        let score = (record.compliance_score + self.config.clean_reward).min(1.0);
        record.compliance_score = clamp_score(score);
        record.compliance_score
    }

    /// Report for `agent_id`. Unknown agents get the default report and no
    /// record is created.
    pub fn report(&self, agent_id: &str) -> AgentReport {
        match self.get(agent_id) {
            Some(h) => {
                let record = h.lock().unwrap_or_else(PoisonError::into_inner);
                AgentReport::from_record(&record, self.config.report_recent)
            }
            None => AgentReport::unknown(agent_id),
        }
    }

    /// Known agent ids, sorted.
    pub fn agents(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies of every record, sorted by agent id.
    pub fn records(&self) -> Vec<AgentRecord> {
        let handles: Vec<AgentHandle> = self
            .agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut records: Vec<AgentRecord> = handles
            .iter()
            .map(|h| h.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .collect();
        records.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        records
    }

    /// Replace all records. Scores are clamped on the way in.
    pub fn restore(&self, records: impl IntoIterator<Item = AgentRecord>) {
        let map = records
            .into_iter()
            .map(|mut r| {
                r.compliance_score = clamp_score(r.compliance_score);
                (r.agent_id.clone(), Arc::new(Mutex::new(r)))
            })
            .collect();
        *self.agents.write().unwrap_or_else(PoisonError::into_inner) = map;
    }
}

/// Clamp into [0, 1]; non-finite scores reset to the floor.
fn clamp_score(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
