//! Global atomic counters.
//!
//! Counters are bumped at the call site; [`Metrics::flush`] emits them as a
//! single `info!` event at the end of a run.

use std::sync::atomic::{AtomicU64, Ordering};

pub static METRICS: Metrics = Metrics::new();

/// Lock-free run counters.
pub struct Metrics {
    scenarios_synthesized: AtomicU64,
    artifacts_compiled: AtomicU64,
    fallbacks_used: AtomicU64,
    timeouts: AtomicU64,
    samples_dropped: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            scenarios_synthesized: AtomicU64::new(0),
            artifacts_compiled: AtomicU64::new(0),
            fallbacks_used: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            samples_dropped: AtomicU64::new(0),
        }
    }

    pub fn add_scenarios(&self, n: u64) {
        self.scenarios_synthesized.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "scenarios_synthesized", n, "counter incremented");
    }

    /// A compile attempt produced a binary.
    pub fn inc_compiled(&self) {
        self.artifacts_compiled.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "artifacts_compiled", "counter incremented");
    }

    pub fn inc_fallbacks(&self) {
        self.fallbacks_used.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "fallbacks_used", "counter incremented");
    }

    pub fn inc_timeouts(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "timeouts", "counter incremented");
    }

    pub fn inc_samples_dropped(&self) {
        self.samples_dropped.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "samples_dropped", "counter incremented");
    }

    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            scenarios_synthesized = self.scenarios_synthesized(),
            artifacts_compiled = self.artifacts_compiled(),
            fallbacks_used = self.fallbacks_used(),
            timeouts = self.timeouts(),
            samples_dropped = self.samples_dropped(),
        );
    }

    pub fn scenarios_synthesized(&self) -> u64 {
        self.scenarios_synthesized.load(Ordering::Relaxed)
    }

    pub fn artifacts_compiled(&self) -> u64 {
        self.artifacts_compiled.load(Ordering::Relaxed)
    }

    pub fn fallbacks_used(&self) -> u64 {
        self.fallbacks_used.load(Ordering::Relaxed)
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    pub fn samples_dropped(&self) -> u64 {
        self.samples_dropped.load(Ordering::Relaxed)
    }

    /// Zero every counter (tests and multi-run processes).
    pub fn reset(&self) {
        self.scenarios_synthesized.store(0, Ordering::Relaxed);
        self.artifacts_compiled.store(0, Ordering::Relaxed);
        self.fallbacks_used.store(0, Ordering::Relaxed);
        self.timeouts.store(0, Ordering::Relaxed);
        self.samples_dropped.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.add_scenarios(4);
        m.add_scenarios(2);
        assert_eq!(m.scenarios_synthesized(), 6);

        m.inc_compiled();
        m.inc_fallbacks();
        m.inc_timeouts();
        m.inc_timeouts();
        assert_eq!(m.artifacts_compiled(), 1);
        assert_eq!(m.fallbacks_used(), 1);
        assert_eq!(m.timeouts(), 2);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.add_scenarios(1);
        m.inc_samples_dropped();
        m.reset();
        assert_eq!(m.scenarios_synthesized(), 0);
        assert_eq!(m.samples_dropped(), 0);
    }
}
