//! Warden Core Library
//!
//! Violation risk scoring and pattern learning for autonomous agents: compile
//! historical violations into patterns, score proposed actions against them,
//! and gate each action according to the acting agent's compliance state.

pub mod compiler;
pub mod config;
pub mod domain;
pub mod engine;
pub mod evaluator;
pub mod gate;
pub mod metrics;
pub mod obs;
pub mod persistence;
pub mod query;
pub mod snapshot;
pub mod store;
pub mod telemetry;
pub mod tracker;

pub use compiler::{
    builtin_records, CompileReport, PatternCompiler, RawViolationRecord, SkipReason,
    SkippedRecord,
};
pub use config::{
    CompilerConfig, ConfigError, EngineConfig, GateConfig, PersistenceConfig, ScoringConfig,
    TrackerConfig,
};
pub use domain::{
    ActionEvent, ActionType, AgentRecord, AgentState, Decision, InterventionResult, MatchKind,
    PatternMatch, Provenance, Result, RiskLevel, TargetRule, ViolationPattern, WardenError,
};
pub use engine::{Engine, StartupReport, StartupSource};
pub use evaluator::{aggregate, Evaluation, RiskEvaluator};
pub use gate::{derive_state, GatePolicy, InterventionGate, StatePolicy};
pub use persistence::{spawn_flush, spawn_flush_loop, SnapshotPersister};
pub use query::QueryJournal;
pub use snapshot::{EngineSnapshot, SNAPSHOT_SCHEMA_VERSION};
pub use store::{PatternEntry, PatternRegistry, PatternStats, PatternStore};
pub use telemetry::init_tracing;
pub use tracker::{AgentReport, AgentScoreTracker};

/// Crate version, reported by the CLI and daemon.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
