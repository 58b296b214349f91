//! Matches action events against a pattern snapshot and scores the risk.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::Utc;

use crate::config::ScoringConfig;
use crate::domain::{ActionEvent, MatchKind, PatternMatch, RiskLevel};
use crate::store::{PatternEntry, PatternStore};

/// Risk assessment of one event, before any gate policy is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    /// Highest contribution first.
    pub matched: Vec<PatternMatch>,
}

impl Evaluation {
    pub fn top(&self) -> Option<&PatternMatch> {
        self.matched.first()
    }
}

/// Combine independent contributions: `1 - Π(1 - c)`, clamped to [0, 1].
///
/// Non-finite input propagates as NaN so callers can detect it.
pub fn aggregate(contributions: impl IntoIterator<Item = f64>) -> f64 {
    let survive: f64 = contributions
        .into_iter()
        .map(|c| 1.0 - c.clamp(0.0, 1.0))
        .product();
    (1.0 - survive).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Default)]
pub struct RiskEvaluator {
    scoring: ScoringConfig,
}

impl RiskEvaluator {
    pub fn new(scoring: ScoringConfig) -> Self {
        Self { scoring }
    }

    pub fn scoring(&self) -> &ScoringConfig {
        &self.scoring
    }

    /// Score `event` and record a match on every matched pattern.
    pub fn evaluate(&self, store: &PatternStore, event: &ActionEvent) -> Evaluation {
        let now = Utc::now();
        let matched = self
            .collect(store, event)
            .into_iter()
            .map(|(entry, mut m)| {
                entry.stats().record_match(now);
                m.match_count = entry.stats().match_count();
                m
            })
            .collect();
        self.finish(matched)
    }

    /// Score `event` without touching match statistics.
    pub fn preview(&self, store: &PatternStore, event: &ActionEvent) -> Evaluation {
        let matched = self
            .collect(store, event)
            .into_iter()
            .map(|(_, m)| m)
            .collect();
        self.finish(matched)
    }

    fn collect<'a>(
        &self,
        store: &'a PatternStore,
        event: &ActionEvent,
    ) -> Vec<(&'a Arc<PatternEntry>, PatternMatch)> {
        let mut hits: Vec<_> = store
            .candidates(event.action_type)
            .filter_map(|entry| {
                let p = entry.pattern();
                let kind = p.rule.match_target(event.action_type, &event.target);
                if kind == MatchKind::None {
                    return None;
                }
                let match_score = self.scoring.score_for(kind);
                if match_score <= 0.0 {
                    return None;
                }
                Some((
                    entry,
                    PatternMatch {
                        pattern_id: p.id.clone(),
                        category: p.category.clone(),
                        weight: p.weight,
                        match_score,
                        contribution: p.weight * match_score,
                        match_count: entry.stats().match_count(),
                        alternative: p.alternative.clone(),
                    },
                ))
            })
            .collect();
        hits.sort_by(|(_, a), (_, b)| rank(a, b));
        hits
    }

    fn finish(&self, matched: Vec<PatternMatch>) -> Evaluation {
        let risk_score = aggregate(matched.iter().map(|m| m.contribution));
        let risk_level = if risk_score.is_finite() {
            self.scoring.level_for(risk_score)
        } else {
            RiskLevel::Low
        };
        Evaluation {
            risk_score,
            risk_level,
            matched,
        }
    }
}

/// Contribution descending, then match count descending, then id.
fn rank(a: &PatternMatch, b: &PatternMatch) -> Ordering {
    b.contribution
        .total_cmp(&a.contribution)
        .then_with(|| b.match_count.cmp(&a.match_count))
        .then_with(|| a.pattern_id.cmp(&b.pattern_id))
}
