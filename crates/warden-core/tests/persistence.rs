//! Snapshot persistence: round-trips, retries and startup fallback.

use std::sync::Arc;
use std::time::Duration;

use warden_core::{
    spawn_flush, spawn_flush_loop, ActionEvent, ActionType, AgentState, Engine, EngineConfig,
    EngineSnapshot, InterventionResult, RawViolationRecord, SnapshotPersister, StartupSource,
    TargetRule, WardenError,
};
use warden_state::fakes::{FailingSnapshotStore, MemorySnapshotStore};
use warden_state::{FsSnapshotStore, SnapshotStore};

fn events() -> Vec<ActionEvent> {
    vec![
        ActionEvent::new("a1", ActionType::Create, "src/enhanced_commands.py"),
        ActionEvent::new("a1", ActionType::Create, "src/test_parser.py"),
        ActionEvent::new("a2", ActionType::Modify, "lib/utils_v2.py"),
        ActionEvent::new("a1", ActionType::Create, "src/main.py"),
        ActionEvent::new("a2", ActionType::Create, "new_handler.rs"),
        ActionEvent::new("a3", ActionType::Delete, "docs/old_notes.md"),
    ]
}

fn learned() -> Vec<RawViolationRecord> {
    vec![RawViolationRecord {
        category: "duplication".into(),
        description: "enhanced copies".into(),
        target_rule: Some(TargetRule::prefix("enhanced_")),
        weight: Some(0.9),
        ..Default::default()
    }]
}

/// The parts of a result that must be reproducible.
fn essence(r: &InterventionResult) -> (String, f64, String, Vec<String>, AgentState) {
    (
        r.decision.to_string(),
        r.risk_score,
        r.risk_level.to_string(),
        r.matched_patterns.iter().map(|m| m.pattern_id.clone()).collect(),
        r.agent_state,
    )
}

#[tokio::test]
async fn snapshot_roundtrip_reproduces_evaluations() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn SnapshotStore> = Arc::new(FsSnapshotStore::new(dir.path()).unwrap());
    let persister = SnapshotPersister::new(store, "default");

    let original = Engine::with_builtin(EngineConfig::default()).unwrap();
    original.ingest(&learned()).unwrap();
    for e in events() {
        original.evaluate_action(&e);
    }
    original.flush(&persister).await.unwrap();
    assert!(!original.is_dirty());

    let (restored, report) = Engine::bootstrap(EngineConfig::default(), &persister)
        .await
        .unwrap();
    assert_eq!(report.source, StartupSource::Snapshot);
    assert!(report.warnings.is_empty());
    assert_eq!(restored.agents(), original.agents());
    assert_eq!(restored.patterns().patterns(), original.patterns().patterns());

    for e in events() {
        let a = original.evaluate_action(&e);
        let b = restored.evaluate_action(&e);
        assert_eq!(essence(&a), essence(&b), "{}", e.target);
    }
    for agent in original.agents() {
        let a = original.report(&agent);
        let b = restored.report(&agent);
        assert_eq!(a.compliance_score, b.compliance_score);
        assert_eq!(a.state, b.state);
        assert_eq!(a.intervention_count, b.intervention_count);
    }
}

#[tokio::test]
async fn empty_store_starts_from_builtin() {
    let persister = SnapshotPersister::new(Arc::new(MemorySnapshotStore::new()), "default");
    let (engine, report) = Engine::bootstrap(EngineConfig::default(), &persister)
        .await
        .unwrap();
    assert_eq!(report.source, StartupSource::BuiltIn);
    assert!(!engine.patterns().is_empty());
}

#[tokio::test]
async fn corrupt_snapshot_falls_back_with_warning() {
    let store = Arc::new(MemorySnapshotStore::new());
    let persister = SnapshotPersister::new(store.clone(), "default");
    let engine = Engine::with_builtin(EngineConfig::default()).unwrap();
    engine.flush(&persister).await.unwrap();
    store.corrupt("default", b"{\"schema_version\":1,\"patterns\":");

    let (engine, report) = Engine::bootstrap(EngineConfig::default(), &persister)
        .await
        .unwrap();
    assert_eq!(report.source, StartupSource::BuiltInAfterCorruption);
    assert_eq!(report.warnings.len(), 1);
    assert!(!engine.patterns().is_empty());
    // The next flush overwrites the bad snapshot.
    assert!(engine.is_dirty());
    engine.flush(&persister).await.unwrap();
    assert!(persister.load().await.unwrap().is_some());
}

#[tokio::test]
async fn undecodable_payload_falls_back() {
    let store = Arc::new(MemorySnapshotStore::new());
    store.save("default", b"not a snapshot").await.unwrap();
    let persister = SnapshotPersister::new(store, "default");
    let (_, report) = Engine::bootstrap(EngineConfig::default(), &persister)
        .await
        .unwrap();
    assert_eq!(report.source, StartupSource::BuiltInAfterCorruption);
}

#[tokio::test]
async fn newer_schema_is_refused() {
    let store = Arc::new(MemorySnapshotStore::new());
    let mut future = serde_json::to_value(EngineSnapshot::new(1, Vec::new(), Vec::new())).unwrap();
    future["schema_version"] = serde_json::json!(9);
    store
        .save("default", &serde_json::to_vec(&future).unwrap())
        .await
        .unwrap();
    let persister = SnapshotPersister::new(store, "default");
    let err = Engine::bootstrap(EngineConfig::default(), &persister)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WardenError::UnsupportedSnapshotVersion { found: 9, .. }
    ));
}

#[tokio::test]
async fn failed_flush_keeps_engine_dirty() {
    let store = Arc::new(FailingSnapshotStore::new(2));
    let persister = SnapshotPersister::new(store.clone(), "default");
    let engine = Engine::with_builtin(EngineConfig::default()).unwrap();
    engine.evaluate_action(&ActionEvent::new("a1", ActionType::Create, "x.py"));

    assert!(engine.flush(&persister).await.is_err());
    assert!(engine.is_dirty());
    assert_eq!(store.attempts(), 2);

    // Self-heals on the next flush.
    engine.flush(&persister).await.unwrap();
    assert!(!engine.is_dirty());
    assert_eq!(store.save_count(), 1);
}

#[tokio::test]
async fn background_flush_persists() {
    let store = Arc::new(MemorySnapshotStore::new());
    let persister = Arc::new(SnapshotPersister::new(store.clone(), "default"));
    let engine = Arc::new(Engine::with_builtin(EngineConfig::default()).unwrap());
    engine.evaluate_action(&ActionEvent::new("a1", ActionType::Create, "x.py"));

    spawn_flush(engine.clone(), persister.clone())
        .await
        .unwrap()
        .unwrap();
    let snap = persister.load().await.unwrap().unwrap();
    assert_eq!(snap.agents.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn flush_loop_saves_only_when_dirty() {
    let store = Arc::new(MemorySnapshotStore::new());
    let persister = Arc::new(SnapshotPersister::new(store.clone(), "default"));
    let engine = Arc::new(Engine::with_builtin(EngineConfig::default()).unwrap());
    let (tx, rx) = tokio::sync::watch::channel(false);
    let task = spawn_flush_loop(engine.clone(), persister, Duration::from_secs(30), rx);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(store.save_count(), 1);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(store.save_count(), 1);

    engine.evaluate_action(&ActionEvent::new("a1", ActionType::Create, "x.py"));
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(store.save_count(), 2);

    tx.send(true).unwrap();
    task.await.unwrap();
}
