//! Read-only pre-check for free-text queries.
//!
//! A pre-check runs the same evaluation and policy as an action, but never
//! blocks, never bumps pattern statistics and never touches agent history.
//! Results go to a bounded [`QueryJournal`] instead.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use crate::domain::{ActionEvent, ActionType, AgentState, Decision, InterventionResult};
use crate::evaluator::RiskEvaluator;
use crate::gate::InterventionGate;
use crate::store::PatternStore;

/// Evaluate `text` as a query by `agent_id` under `state`.
///
/// A would-be Block is reported as Warn.
pub fn precheck(
    evaluator: &RiskEvaluator,
    gate: &InterventionGate,
    store: &PatternStore,
    state: AgentState,
    agent_id: &str,
    text: &str,
) -> InterventionResult {
    let event = ActionEvent::new(agent_id, ActionType::Query, text);
    let evaluation = evaluator.preview(store, &event);
    let mut result = gate.result_for(&event, evaluation, state);
    if result.decision == Decision::Block {
        result.decision = Decision::Warn;
    }
    result
}

/// Bounded log of query pre-checks, oldest evicted first.
#[derive(Debug)]
pub struct QueryJournal {
    capacity: usize,
    entries: Mutex<VecDeque<InterventionResult>>,
}

impl QueryJournal {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self, result: InterventionResult) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.push_back(result);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    /// Entries for one agent, oldest first.
    pub fn for_agent(&self, agent_id: &str) -> Vec<InterventionResult> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.agent_id == agent_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{builtin_records, PatternCompiler};
    use crate::config::CompilerConfig;
    use crate::domain::Provenance;
    use std::sync::atomic::AtomicBool;

    fn builtin_store() -> PatternStore {
        let compiler = PatternCompiler::new(CompilerConfig::default());
        let records = builtin_records(compiler.config());
        compiler
            .compile(
                &PatternStore::empty(),
                &records,
                Provenance::BuiltIn,
                &AtomicBool::new(false),
            )
            .unwrap()
            .0
    }

    #[test]
    fn restricted_query_is_capped_at_warn() {
        let store = builtin_store();
        let r = precheck(
            &RiskEvaluator::default(),
            &InterventionGate::default(),
            &store,
            AgentState::Restricted,
            "a1",
            "create enhanced_commands.py next to commands.py",
        );
        assert!(!r.matched_patterns.is_empty());
        assert_eq!(r.decision, Decision::Warn);
        assert_eq!(r.action_type, ActionType::Query);
    }

    #[test]
    fn precheck_leaves_stats_alone() {
        let store = builtin_store();
        precheck(
            &RiskEvaluator::default(),
            &InterventionGate::default(),
            &store,
            AgentState::Unrestricted,
            "a1",
            "write utils_v2.py",
        );
        assert!(store.entries().all(|e| e.stats().match_count() == 0));
    }

    #[test]
    fn journal_is_bounded_and_filterable() {
        let journal = QueryJournal::new(2);
        for agent in ["a", "b", "a"] {
            let event = ActionEvent::query(agent, "hello");
            let mut r = InterventionResult::degraded(&event, AgentState::Unrestricted, "x");
            r.degraded = false;
            journal.record(r);
        }
        assert_eq!(journal.len(), 2);
        assert_eq!(journal.for_agent("a").len(), 1);
        assert_eq!(journal.for_agent("b").len(), 1);
    }
}
