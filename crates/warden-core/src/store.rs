//! Immutable pattern snapshots and the registry that publishes them.
//!
//! A [`PatternStore`] never changes after it is built. Refreshes build a new
//! store from the current one with [`PatternStore::to_builder`] and publish it
//! through [`PatternRegistry`]; in-flight evaluators keep the `Arc` they
//! already hold. Match statistics are the exception: they live in a shared
//! [`PatternStats`] that is carried across upserts and bumped with atomics.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};

use crate::domain::{ActionType, ViolationPattern};

// ---------------------------------------------------------------------------
// PatternStats
// ---------------------------------------------------------------------------

/// Lock-free match statistics for one pattern id.
#[derive(Debug, Default)]
pub struct PatternStats {
    match_count: AtomicU64,
    /// Unix millis of the last match; 0 means never.
    last_matched_millis: AtomicI64,
}

impl PatternStats {
    pub fn new(match_count: u64, last_matched_at: Option<DateTime<Utc>>) -> Self {
        Self {
            match_count: AtomicU64::new(match_count),
            last_matched_millis: AtomicI64::new(
                last_matched_at.map(|t| t.timestamp_millis()).unwrap_or(0),
            ),
        }
    }

    pub fn record_match(&self, at: DateTime<Utc>) {
        self.match_count.fetch_add(1, Ordering::Relaxed);
        self.last_matched_millis
            .fetch_max(at.timestamp_millis(), Ordering::Relaxed);
    }

    pub fn match_count(&self) -> u64 {
        self.match_count.load(Ordering::Relaxed)
    }

    pub fn last_matched_at(&self) -> Option<DateTime<Utc>> {
        match self.last_matched_millis.load(Ordering::Relaxed) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }
}

// ---------------------------------------------------------------------------
// PatternEntry
// ---------------------------------------------------------------------------

/// A pattern definition plus its live statistics.
#[derive(Debug)]
pub struct PatternEntry {
    pattern: ViolationPattern,
    stats: Arc<PatternStats>,
}

impl PatternEntry {
    fn new(pattern: ViolationPattern) -> Self {
        let stats = Arc::new(PatternStats::new(
            pattern.match_count,
            pattern.last_matched_at,
        ));
        Self { pattern, stats }
    }

    /// The definition. Its `match_count`/`last_matched_at` are stale; read
    /// [`Self::stats`] or use [`Self::to_pattern`].
    pub fn pattern(&self) -> &ViolationPattern {
        &self.pattern
    }

    pub fn stats(&self) -> &PatternStats {
        &self.stats
    }

    /// The definition with current statistics folded in.
    pub fn to_pattern(&self) -> ViolationPattern {
        let mut p = self.pattern.clone();
        p.match_count = self.stats.match_count();
        p.last_matched_at = self.stats.last_matched_at();
        p
    }
}

// ---------------------------------------------------------------------------
// PatternStore
// ---------------------------------------------------------------------------

/// An immutable, versioned set of patterns keyed by id.
#[derive(Debug, Default)]
pub struct PatternStore {
    version: u64,
    entries: BTreeMap<String, Arc<PatternEntry>>,
}

impl PatternStore {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Rebuild a store from persisted patterns.
    pub fn from_patterns(version: u64, patterns: impl IntoIterator<Item = ViolationPattern>) -> Self {
        let entries = patterns
            .into_iter()
            .map(|p| (p.id.clone(), Arc::new(PatternEntry::new(p))))
            .collect();
        Self { version, entries }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<PatternEntry>> {
        self.entries.get(id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &Arc<PatternEntry>> {
        self.entries.values()
    }

    /// Entries whose action predicate includes `action`.
    pub fn candidates(&self, action: ActionType) -> impl Iterator<Item = &Arc<PatternEntry>> {
        self.entries
            .values()
            .filter(move |e| e.pattern.applies_to(action))
    }

    /// All patterns with current statistics, ordered by id.
    pub fn patterns(&self) -> Vec<ViolationPattern> {
        self.entries.values().map(|e| e.to_pattern()).collect()
    }

    /// Start a copy-on-write edit of this store.
    pub fn to_builder(&self) -> PatternStoreBuilder {
        PatternStoreBuilder {
            base_version: self.version,
            entries: self.entries.clone(),
        }
    }
}

/// Whether an upsert created or replaced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Added,
    Updated,
}

/// Accumulates upserts against a base store.
#[derive(Debug)]
pub struct PatternStoreBuilder {
    base_version: u64,
    entries: BTreeMap<String, Arc<PatternEntry>>,
}

impl PatternStoreBuilder {
    /// Insert or replace by id.
    ///
    /// A replacement takes the new weight, alternative, description and
    /// actions, but keeps the existing provenance and statistics.
    pub fn upsert(&mut self, mut pattern: ViolationPattern) -> UpsertOutcome {
        match self.entries.get(&pattern.id) {
            Some(existing) => {
                pattern.provenance = existing.pattern.provenance;
                pattern.match_count = 0;
                pattern.last_matched_at = None;
                let entry = PatternEntry {
                    pattern,
                    stats: Arc::clone(&existing.stats),
                };
                self.entries.insert(entry.pattern.id.clone(), Arc::new(entry));
                UpsertOutcome::Updated
            }
            None => {
                self.entries
                    .insert(pattern.id.clone(), Arc::new(PatternEntry::new(pattern)));
                UpsertOutcome::Added
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn build(self) -> PatternStore {
        PatternStore {
            version: self.base_version + 1,
            entries: self.entries,
        }
    }
}

// ---------------------------------------------------------------------------
// PatternRegistry
// ---------------------------------------------------------------------------

/// Holds the current [`PatternStore`] and swaps it atomically.
///
/// Readers take an `Arc` clone under a short read lock and never wait on
/// compilation. Writers are serialised by a separate refresh mutex so two
/// refreshes cannot both build from the same base and lose an update.
#[derive(Debug, Default)]
pub struct PatternRegistry {
    current: RwLock<Arc<PatternStore>>,
    refresh: Mutex<()>,
}

impl PatternRegistry {
    pub fn new(store: PatternStore) -> Self {
        Self {
            current: RwLock::new(Arc::new(store)),
            refresh: Mutex::new(()),
        }
    }

    /// The store evaluators should read from right now.
    pub fn snapshot(&self) -> Arc<PatternStore> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Replace the current store.
    pub fn publish(&self, store: PatternStore) -> Arc<PatternStore> {
        let store = Arc::new(store);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&store);
        store
    }

    /// Serialise a read-modify-publish cycle.
    ///
    /// `f` receives the current store and returns the replacement (or
    /// `None` to publish nothing) plus a value passed back to the caller.
    pub fn update<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&PatternStore) -> Result<(Option<PatternStore>, T), E>,
    {
        let _guard = self.refresh_guard();
        let base = self.snapshot();
        let (next, out) = f(&base)?;
        if let Some(next) = next {
            self.publish(next);
        }
        Ok(out)
    }

    fn refresh_guard(&self) -> MutexGuard<'_, ()> {
        self.refresh.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{pattern_id, Provenance, TargetRule};
    use std::collections::BTreeSet;

    fn pattern(prefix: &str, weight: f64, provenance: Provenance) -> ViolationPattern {
        let rule = TargetRule::prefix(prefix);
        ViolationPattern {
            id: pattern_id("duplication", &rule),
            category: "duplication".into(),
            description: String::new(),
            actions: BTreeSet::from([ActionType::Create]),
            rule,
            weight,
            alternative: "edit the original".into(),
            provenance,
            match_count: 0,
            last_matched_at: None,
        }
    }

    #[test]
    fn upsert_preserves_stats_and_provenance() {
        let mut b = PatternStore::empty().to_builder();
        assert_eq!(
            b.upsert(pattern("enhanced_", 0.5, Provenance::BuiltIn)),
            UpsertOutcome::Added
        );
        let v1 = b.build();
        let id = pattern_id("duplication", &TargetRule::prefix("enhanced_"));
        v1.get(&id).unwrap().stats().record_match(Utc::now());

        let mut b = v1.to_builder();
        assert_eq!(
            b.upsert(pattern("enhanced_", 0.9, Provenance::Learned)),
            UpsertOutcome::Updated
        );
        let v2 = b.build();

        let entry = v2.get(&id).unwrap();
        assert_eq!(entry.pattern().weight, 0.9);
        assert_eq!(entry.pattern().provenance, Provenance::BuiltIn);
        assert_eq!(entry.stats().match_count(), 1);
        assert_eq!(v2.len(), 1);
        assert_eq!(v2.version(), 2);

        // Old snapshot shares the counter.
        v2.get(&id).unwrap().stats().record_match(Utc::now());
        assert_eq!(v1.get(&id).unwrap().stats().match_count(), 2);
        // But keeps its own definition.
        assert_eq!(v1.get(&id).unwrap().pattern().weight, 0.5);
    }

    #[test]
    fn from_patterns_restores_stats() {
        let mut p = pattern("new_", 0.85, Provenance::Learned);
        let at = Utc::now();
        p.match_count = 4;
        p.last_matched_at = Some(at);
        let store = PatternStore::from_patterns(7, [p.clone()]);
        let back = store.patterns().pop().unwrap();
        assert_eq!(back.match_count, 4);
        assert_eq!(
            back.last_matched_at.map(|t| t.timestamp_millis()),
            Some(at.timestamp_millis())
        );
        assert_eq!(store.version(), 7);
    }

    #[test]
    fn candidates_filter_by_action() {
        let store = PatternStore::from_patterns(1, [pattern("enhanced_", 0.9, Provenance::BuiltIn)]);
        assert_eq!(store.candidates(ActionType::Create).count(), 1);
        assert_eq!(store.candidates(ActionType::Delete).count(), 0);
    }

    #[test]
    fn registry_keeps_old_snapshot_alive() {
        let reg = PatternRegistry::new(PatternStore::empty());
        let before = reg.snapshot();
        reg.publish(PatternStore::from_patterns(
            1,
            [pattern("enhanced_", 0.9, Provenance::BuiltIn)],
        ));
        assert!(before.is_empty());
        assert_eq!(reg.snapshot().len(), 1);
    }

    #[test]
    fn update_returning_none_publishes_nothing() {
        let reg = PatternRegistry::new(PatternStore::empty());
        let out: Result<u8, ()> = reg.update(|_| Ok((None, 3)));
        assert_eq!(out, Ok(3));
        assert_eq!(reg.snapshot().version(), 0);

        let err: Result<(), &str> = reg.update(|_| Err("cancelled"));
        assert_eq!(err, Err("cancelled"));
        assert_eq!(reg.snapshot().version(), 0);
    }
}
