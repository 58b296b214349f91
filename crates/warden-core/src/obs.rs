//! Structured lifecycle events for the Warden engine.
//!
//! - `AgentSpan` scopes evaluation logs to one agent id
//! - `emit_*` functions log one event each, tagged with an `event` field
//!
//! Events are emitted at `info!` (failures at `warn!`).

use tracing::{info, warn};

use crate::domain::{AgentState, InterventionResult};

/// RAII guard that enters an agent-scoped span.
///
/// ```ignore
/// let _span = AgentSpan::enter("agent-7");
/// // tracing calls here carry agent_id = "agent-7"
/// ```
pub struct AgentSpan {
    _span: tracing::span::EnteredSpan,
}

impl AgentSpan {
    pub fn enter(agent_id: &str) -> Self {
        let span = tracing::info_span!("warden.agent", agent_id = %agent_id);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_action_evaluated(result: &InterventionResult) {
    info!(
        event = "action.evaluated",
        agent_id = %result.agent_id,
        action = %result.action_type,
        target = %result.target,
        risk_score = result.risk_score,
        risk_level = %result.risk_level,
        decision = %result.decision,
        matched = result.matched_patterns.len(),
        state = %result.agent_state,
    );
}

pub fn emit_action_degraded(agent_id: &str, reason: &dyn std::fmt::Display) {
    warn!(event = "action.degraded", agent_id = %agent_id, reason = %reason);
}

pub fn emit_query_checked(result: &InterventionResult) {
    info!(
        event = "query.checked",
        agent_id = %result.agent_id,
        risk_score = result.risk_score,
        decision = %result.decision,
        matched = result.matched_patterns.len(),
    );
}

pub fn emit_state_changed(agent_id: &str, from: AgentState, to: AgentState, score: f64) {
    info!(
        event = "agent.state_changed",
        agent_id = %agent_id,
        from = %from,
        to = %to,
        compliance_score = score,
    );
}

pub fn emit_patterns_published(version: u64, added: usize, updated: usize, skipped: usize, total: usize) {
    info!(
        event = "patterns.published",
        version,
        added,
        updated,
        skipped,
        total,
    );
}

pub fn emit_snapshot_flushed(slot: &str, digest: &str, bytes: usize, agents: usize) {
    info!(
        event = "snapshot.flushed",
        slot = %slot,
        digest = %digest,
        bytes,
        agents,
    );
}

pub fn emit_snapshot_flush_failed(slot: &str, attempts: u32, error: &dyn std::fmt::Display) {
    warn!(
        event = "snapshot.flush_failed",
        slot = %slot,
        attempts,
        error = %error,
    );
}

pub fn emit_snapshot_loaded(slot: &str, patterns: usize, agents: usize) {
    info!(
        event = "snapshot.loaded",
        slot = %slot,
        patterns,
        agents,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_span_enters() {
        let _span = AgentSpan::enter("agent-1");
        emit_state_changed("agent-1", AgentState::Unrestricted, AgentState::Watched, 0.95);
    }
}
