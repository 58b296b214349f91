//! The engine facade.
//!
//! [`Engine`] owns the pattern registry, the per-agent tracker and the query
//! journal, and wires evaluation, gating and persistence together. It is
//! `Send + Sync` and meant to be shared behind an `Arc`.
//!
//! Nothing on the per-event path is fatal: if evaluation cannot complete
//! (poisoned agent lock, non-finite score) the action is allowed and the
//! result is flagged `degraded`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use warden_state::ContentDigest;

use crate::compiler::{builtin_records, CompileReport, PatternCompiler, RawViolationRecord};
use crate::config::EngineConfig;
use crate::domain::{
    ActionEvent, ActionType, AgentRecord, Decision, InterventionResult, Provenance, Result,
    WardenError,
};
use crate::evaluator::RiskEvaluator;
use crate::gate::{derive_state, InterventionGate};
use crate::metrics::METRICS;
use crate::obs;
use crate::persistence::SnapshotPersister;
use crate::query::{self, QueryJournal};
use crate::snapshot::EngineSnapshot;
use crate::store::{PatternRegistry, PatternStore};
use crate::tracker::{AgentReport, AgentScoreTracker};

/// Where the engine's state came from at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupSource {
    Snapshot,
    BuiltIn,
    BuiltInAfterCorruption,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupReport {
    pub source: StartupSource,
    pub warnings: Vec<String>,
}

#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    registry: PatternRegistry,
    compiler: PatternCompiler,
    evaluator: RiskEvaluator,
    gate: InterventionGate,
    tracker: AgentScoreTracker,
    journal: QueryJournal,
    dirty: AtomicBool,
}

impl Engine {
    /// An engine with no patterns.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            registry: PatternRegistry::new(PatternStore::empty()),
            compiler: PatternCompiler::new(config.compiler.clone()),
            evaluator: RiskEvaluator::new(config.scoring.clone()),
            gate: InterventionGate::new(config.gate.clone()),
            tracker: AgentScoreTracker::new(config.tracker.clone()),
            journal: QueryJournal::new(config.query_log_capacity),
            dirty: AtomicBool::new(false),
            config,
        }
    }

    /// An engine seeded with the built-in pattern set.
    pub fn with_builtin(config: EngineConfig) -> Result<Self> {
        let engine = Self::new(config);
        engine.load_builtin()?;
        Ok(engine)
    }

    /// An engine restored from a snapshot.
    pub fn from_snapshot(config: EngineConfig, snapshot: EngineSnapshot) -> Self {
        let engine = Self::new(config);
        engine.restore(snapshot);
        engine
    }

    /// Load from `persister`, falling back to the built-in set when the
    /// stored snapshot is corrupt or absent.
    ///
    /// A snapshot written by a newer schema, or a store that cannot be
    /// reached, is an error: starting fresh would overwrite it on the next
    /// flush.
    pub async fn bootstrap(
        config: EngineConfig,
        persister: &SnapshotPersister,
    ) -> Result<(Self, StartupReport)> {
        match persister.load().await {
            Ok(Some(snapshot)) => Ok((
                Self::from_snapshot(config, snapshot),
                StartupReport {
                    source: StartupSource::Snapshot,
                    warnings: Vec::new(),
                },
            )),
            Ok(None) => Ok((
                Self::with_builtin(config)?,
                StartupReport {
                    source: StartupSource::BuiltIn,
                    warnings: Vec::new(),
                },
            )),
            Err(WardenError::CorruptSnapshot(reason)) => {
                let warning = format!(
                    "snapshot in slot '{}' is corrupt ({reason}); starting from built-in patterns",
                    persister.slot()
                );
                tracing::warn!(slot = %persister.slot(), %reason, "falling back to built-in patterns");
                let engine = Self::with_builtin(config)?;
                engine.mark_dirty();
                Ok((
                    engine,
                    StartupReport {
                        source: StartupSource::BuiltInAfterCorruption,
                        warnings: vec![warning],
                    },
                ))
            }
            Err(e) => Err(e),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &PatternRegistry {
        &self.registry
    }

    pub fn tracker(&self) -> &AgentScoreTracker {
        &self.tracker
    }

    /// Current pattern snapshot.
    pub fn patterns(&self) -> Arc<PatternStore> {
        self.registry.snapshot()
    }

    // -----------------------------------------------------------------------
    // Per-event path
    // -----------------------------------------------------------------------

    /// Evaluate an action, record the result against the agent, and return
    /// it. Always produces exactly one result.
    ///
    /// Queries are routed to [`Self::precheck_query`] and never reach agent
    /// history.
    pub fn evaluate_action(&self, event: &ActionEvent) -> InterventionResult {
        if event.action_type == ActionType::Query {
            return self.precheck_query(&event.agent_id, &event.target);
        }
        let _span = obs::AgentSpan::enter(&event.agent_id);
        METRICS.inc_evaluations();
        let handle = self.tracker.handle(&event.agent_id);
        let store = self.registry.snapshot();

        let result = match handle.lock() {
            Ok(mut record) => self.gate_locked(&mut record, &store, event),
            Err(poisoned) => {
                let mut record = poisoned.into_inner();
                let err = WardenError::AgentLockPoisoned(event.agent_id.clone());
                let result = self.degrade(&mut record, event, &err);
                drop(record);
                handle.clear_poison();
                result
            }
        };
        self.mark_dirty();
        result
    }

    /// Would-be result for an action, with no side effects at all.
    pub fn preview_action(&self, event: &ActionEvent) -> InterventionResult {
        if event.action_type == ActionType::Query {
            let state = self.tracker.state_of(&event.agent_id);
            return query::precheck(
                &self.evaluator,
                &self.gate,
                &self.registry.snapshot(),
                state,
                &event.agent_id,
                &event.target,
            );
        }
        let store = self.registry.snapshot();
        let evaluation = self.evaluator.preview(&store, event);
        self.gate
            .result_for(event, evaluation, self.tracker.state_of(&event.agent_id))
    }

    /// Read-only check of a free-text query. Never blocks; logged to the
    /// query journal rather than agent history.
    pub fn precheck_query(&self, agent_id: &str, text: &str) -> InterventionResult {
        METRICS.inc_queries();
        let state = self.tracker.state_of(agent_id);
        let result = query::precheck(
            &self.evaluator,
            &self.gate,
            &self.registry.snapshot(),
            state,
            agent_id,
            text,
        );
        obs::emit_query_checked(&result);
        self.journal.record(result.clone());
        result
    }

    /// Query pre-checks recorded for `agent_id`, oldest first.
    pub fn query_log(&self, agent_id: &str) -> Vec<InterventionResult> {
        self.journal.for_agent(agent_id)
    }

    fn gate_locked(
        &self,
        record: &mut AgentRecord,
        store: &PatternStore,
        event: &ActionEvent,
    ) -> InterventionResult {
        let evaluation = self.evaluator.evaluate(store, event);
        if !evaluation.risk_score.is_finite() {
            let err = WardenError::NonFiniteScore {
                agent_id: event.agent_id.clone(),
            };
            return self.degrade(record, event, &err);
        }
        let result = self.gate.gate(record, event, evaluation, &self.tracker);
        match result.decision {
            Decision::Block => METRICS.inc_blocks(),
            Decision::Warn => METRICS.inc_warns(),
            Decision::Allow => {}
        }
        obs::emit_action_evaluated(&result);
        result
    }

    fn degrade(
        &self,
        record: &mut AgentRecord,
        event: &ActionEvent,
        err: &WardenError,
    ) -> InterventionResult {
        METRICS.inc_degraded();
        obs::emit_action_degraded(&event.agent_id, err);
        let result = InterventionResult::degraded(event, record.state, err.to_string());
        self.gate.record(record, result.clone());
        result
    }

    // -----------------------------------------------------------------------
    // Patterns
    // -----------------------------------------------------------------------

    /// Compile `records` as learned patterns and publish the result.
    ///
    /// Setting `cancel` abandons the refresh; nothing is published.
    pub fn refresh_patterns(
        &self,
        records: &[RawViolationRecord],
        cancel: &AtomicBool,
    ) -> Result<CompileReport> {
        self.compile_and_publish(records, Provenance::Learned, cancel)
    }

    /// [`Self::refresh_patterns`] without a cancellation flag.
    pub fn ingest(&self, records: &[RawViolationRecord]) -> Result<CompileReport> {
        self.refresh_patterns(records, &AtomicBool::new(false))
    }

    fn load_builtin(&self) -> Result<CompileReport> {
        let records = builtin_records(self.compiler.config());
        self.compile_and_publish(&records, Provenance::BuiltIn, &AtomicBool::new(false))
    }

    fn compile_and_publish(
        &self,
        records: &[RawViolationRecord],
        provenance: Provenance,
        cancel: &AtomicBool,
    ) -> Result<CompileReport> {
        let report = self.registry.update(|current| {
            let (next, report) = self.compiler.compile(current, records, provenance, cancel)?;
            if cancel.load(Ordering::Relaxed) {
                return Err(WardenError::RefreshCancelled);
            }
            Ok((Some(next), report))
        })?;
        METRICS.inc_refreshes();
        obs::emit_patterns_published(
            report.version,
            report.added,
            report.updated,
            report.skipped.len(),
            report.total_patterns,
        );
        self.mark_dirty();
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Reports
    // -----------------------------------------------------------------------

    pub fn report(&self, agent_id: &str) -> AgentReport {
        self.tracker.report(agent_id)
    }

    pub fn agents(&self) -> Vec<String> {
        self.tracker.agents()
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    pub fn snapshot(&self) -> EngineSnapshot {
        let store = self.registry.snapshot();
        EngineSnapshot::new(store.version(), store.patterns(), self.tracker.records())
    }

    /// Replace all patterns and agent records with `snapshot`. Agent states
    /// are re-derived from their history rather than trusted.
    pub fn restore(&self, snapshot: EngineSnapshot) {
        self.registry.publish(PatternStore::from_patterns(
            snapshot.pattern_version,
            snapshot.patterns,
        ));
        let gate_config = self.gate.config();
        self.tracker.restore(snapshot.agents.into_iter().map(|mut r| {
            r.truncate_history(gate_config.history_capacity);
            r.state = derive_state(&r, gate_config);
            r
        }));
        self.dirty.store(false, Ordering::Relaxed);
    }

    /// Whether anything changed since the last successful flush.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Relaxed)
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Relaxed);
    }

    /// Save a snapshot through `persister`. On failure the engine stays
    /// dirty so the next flush tries again.
    pub async fn flush(&self, persister: &SnapshotPersister) -> Result<ContentDigest> {
        self.dirty.store(false, Ordering::Relaxed);
        let snapshot = self.snapshot();
        persister.save(&snapshot).await.inspect_err(|_| self.mark_dirty())
    }
}
