//! Global atomic counters for Warden.
//!
//! Counters are bumped silently at the call site. [`Metrics::flush`] emits
//! every value as one `tracing::info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    evaluations: AtomicU64,
    blocks: AtomicU64,
    warns: AtomicU64,
    degraded: AtomicU64,
    queries: AtomicU64,
    refreshes: AtomicU64,
    flush_failures: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            evaluations: AtomicU64::new(0),
            blocks: AtomicU64::new(0),
            warns: AtomicU64::new(0),
            degraded: AtomicU64::new(0),
            queries: AtomicU64::new(0),
            refreshes: AtomicU64::new(0),
            flush_failures: AtomicU64::new(0),
        }
    }

    pub fn inc_evaluations(&self) {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_blocks(&self) {
        self.blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_warns(&self) {
        self.warns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_degraded(&self) {
        self.degraded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "degraded", "counter incremented");
    }

    pub fn inc_queries(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_refreshes(&self) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_flush_failures(&self) {
        self.flush_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "flush_failures", "counter incremented");
    }

    /// Emit all current values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            evaluations = self.evaluations(),
            blocks = self.blocks(),
            warns = self.warns(),
            degraded = self.degraded(),
            queries = self.queries(),
            refreshes = self.refreshes(),
            flush_failures = self.flush_failures(),
        );
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    pub fn blocks(&self) -> u64 {
        self.blocks.load(Ordering::Relaxed)
    }

    pub fn warns(&self) -> u64 {
        self.warns.load(Ordering::Relaxed)
    }

    pub fn degraded(&self) -> u64 {
        self.degraded.load(Ordering::Relaxed)
    }

    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    pub fn refreshes(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    pub fn flush_failures(&self) -> u64 {
        self.flush_failures.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        for counter in [
            &self.evaluations,
            &self.blocks,
            &self.warns,
            &self.degraded,
            &self.queries,
            &self.refreshes,
            &self.flush_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_evaluations();
        m.inc_evaluations();
        m.inc_blocks();
        m.inc_flush_failures();
        assert_eq!(m.evaluations(), 2);
        assert_eq!(m.blocks(), 1);
        assert_eq!(m.warns(), 0);
        assert_eq!(m.flush_failures(), 1);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_evaluations();
        m.inc_queries();
        m.inc_refreshes();
        m.inc_degraded();
        m.reset();
        assert_eq!(m.evaluations(), 0);
        assert_eq!(m.queries(), 0);
        assert_eq!(m.refreshes(), 0);
        assert_eq!(m.degraded(), 0);
    }
}
