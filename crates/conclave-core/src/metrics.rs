//! Global atomic counters for Conclave observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a plan or council session).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters with no allocations or locking.
pub struct Metrics {
    steps_executed: AtomicU64,
    steps_failed: AtomicU64,
    workflow_iterations: AtomicU64,
    council_sessions: AtomicU64,
    governance_violations: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            steps_executed: AtomicU64::new(0),
            steps_failed: AtomicU64::new(0),
            workflow_iterations: AtomicU64::new(0),
            council_sessions: AtomicU64::new(0),
            governance_violations: AtomicU64::new(0),
        }
    }

    pub fn inc_steps_executed(&self) {
        self.steps_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_steps_failed(&self) {
        self.steps_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_workflow_iterations(&self) {
        self.workflow_iterations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_council_sessions(&self) {
        self.council_sessions.fetch_add(1, Ordering::Relaxed);
    }

    /// Add `n` governance violations.
    pub fn add_governance_violations(&self, n: u64) {
        self.governance_violations.fetch_add(n, Ordering::Relaxed);
    }

    /// Emit all current counter values as a single `info!` event.
    ///
    /// Call this at natural boundaries (end of a plan, CLI exit)
    /// rather than on every increment.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            steps_executed = self.steps_executed(),
            steps_failed = self.steps_failed(),
            workflow_iterations = self.workflow_iterations(),
            council_sessions = self.council_sessions(),
            governance_violations = self.governance_violations(),
        );
    }

    pub fn steps_executed(&self) -> u64 {
        self.steps_executed.load(Ordering::Relaxed)
    }

    pub fn steps_failed(&self) -> u64 {
        self.steps_failed.load(Ordering::Relaxed)
    }

    pub fn workflow_iterations(&self) -> u64 {
        self.workflow_iterations.load(Ordering::Relaxed)
    }

    pub fn council_sessions(&self) -> u64 {
        self.council_sessions.load(Ordering::Relaxed)
    }

    pub fn governance_violations(&self) -> u64 {
        self.governance_violations.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.steps_executed.store(0, Ordering::Relaxed);
        self.steps_failed.store(0, Ordering::Relaxed);
        self.workflow_iterations.store(0, Ordering::Relaxed);
        self.council_sessions.store(0, Ordering::Relaxed);
        self.governance_violations.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_steps_executed();
        m.inc_steps_executed();
        m.inc_steps_failed();
        m.add_governance_violations(3);
        assert_eq!(m.steps_executed(), 2);
        assert_eq!(m.steps_failed(), 1);
        assert_eq!(m.governance_violations(), 3);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_workflow_iterations();
        m.inc_council_sessions();
        m.reset();
        assert_eq!(m.workflow_iterations(), 0);
        assert_eq!(m.council_sessions(), 0);
    }
}
