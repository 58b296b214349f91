use std::collections::BTreeSet;

use chrono::Utc;
use proptest::prelude::*;
use warden_core::{
    aggregate, derive_state, ActionEvent, ActionType, AgentRecord, AgentScoreTracker, Decision,
    Engine, EngineConfig, RawViolationRecord, RiskLevel, TargetRule, TrackerConfig,
};

fn arb_level() -> impl Strategy<Value = RiskLevel> {
    prop_oneof![
        Just(RiskLevel::Low),
        Just(RiskLevel::Medium),
        Just(RiskLevel::High),
        Just(RiskLevel::Critical),
    ]
}

/// `Some(level)` penalizes, `None` rewards.
fn arb_adjustment() -> impl Strategy<Value = Option<RiskLevel>> {
    prop_oneof![arb_level().prop_map(Some), Just(None)]
}

fn arb_action() -> impl Strategy<Value = ActionType> {
    prop_oneof![
        Just(ActionType::Create),
        Just(ActionType::Modify),
        Just(ActionType::Delete),
    ]
}

fn arb_target() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("src/enhanced_commands.py".to_string()),
        Just("src/test_parser.py".to_string()),
        Just("draft_notes.md".to_string()),
        Just("src/main.rs".to_string()),
        "[a-z_/]{1,24}\\.(py|rs|md)",
    ]
}

fn learned_engine(config: EngineConfig) -> Engine {
    let engine = Engine::with_builtin(config).unwrap();
    engine
        .ingest(&[RawViolationRecord {
            category: "duplication".into(),
            description: "enhanced copies".into(),
            target_rule: Some(TargetRule::prefix("enhanced_")),
            weight: Some(0.9),
            actions: Some(BTreeSet::from([ActionType::Create])),
            ..Default::default()
        }])
        .unwrap();
    engine
}

// ── Risk aggregation ─────────────────────────────────────────────────────

proptest! {
    #[test]
    fn aggregate_stays_in_unit_range(cs in prop::collection::vec(0.0f64..=1.0, 0..12)) {
        let r = aggregate(cs);
        prop_assert!((0.0..=1.0).contains(&r));
    }

    #[test]
    fn adding_a_match_never_lowers_risk(
        cs in prop::collection::vec(0.0f64..=1.0, 0..12),
        extra in 0.0f64..=1.0,
    ) {
        let before = aggregate(cs.clone());
        let mut more = cs;
        more.push(extra);
        prop_assert!(aggregate(more) >= before - 1e-12);
    }

    #[test]
    fn aggregate_ignores_order(cs in prop::collection::vec(0.0f64..=1.0, 0..12)) {
        let mut rev = cs.clone();
        rev.reverse();
        prop_assert!((aggregate(cs) - aggregate(rev)).abs() < 1e-12);
    }
}

// ── Compliance score ─────────────────────────────────────────────────────

proptest! {
    #[test]
    fn score_stays_in_unit_range(steps in prop::collection::vec(arb_adjustment(), 0..300)) {
        let tracker = AgentScoreTracker::new(TrackerConfig::default());
        let mut record = AgentRecord::new("agent", Utc::now());
        for step in steps {
            let score = match step {
                Some(level) => tracker.penalize(&mut record, level),
                None => tracker.reward(&mut record),
            };
            prop_assert!((0.0..=1.0).contains(&score));
        }
    }
}

// ── Engine invariants ────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn history_and_counts_hold_for_any_sequence(
        events in prop::collection::vec((arb_action(), arb_target()), 1..80),
    ) {
        let mut config = EngineConfig::default();
        config.gate.history_capacity = 16;
        let engine = learned_engine(config);

        let mut flagged = 0u64;
        for (action, target) in &events {
            let r = engine.evaluate_action(&ActionEvent::new("agent", *action, target.clone()));
            if r.matched_patterns.is_empty() {
                prop_assert_eq!(r.decision, Decision::Allow);
            }
            if r.is_flagged() {
                flagged += 1;
            }
        }

        let record = engine.tracker().get("agent").unwrap().lock().unwrap().clone();
        prop_assert!(record.history.len() <= 16);
        prop_assert_eq!(record.history.len(), events.len().min(16));
        prop_assert_eq!(record.intervention_count, flagged);
        prop_assert_eq!(record.state, derive_state(&record, &engine.config().gate));
    }

    #[test]
    fn query_precheck_never_blocks(text in ".{0,64}", score in 0.0f64..=1.0) {
        let engine = learned_engine(EngineConfig::default());
        engine.tracker().handle("agent").lock().unwrap().compliance_score = score;
        let r = engine.precheck_query("agent", &text);
        prop_assert_ne!(r.decision, Decision::Block);
    }
}
