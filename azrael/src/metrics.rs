//! Orchestrator counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide tick-loop metrics. All counters are monotonic except
/// `bodies_sleeping`, which is a gauge.
#[derive(Debug, Default)]
pub struct SimMetrics {
    /// Completed ticks.
    pub ticks: AtomicU64,
    /// Ticks that started late because the previous one ran long.
    pub tick_overrun: AtomicU64,
    /// Physics merges dropped because a command won the version race.
    pub cas_conflicts: AtomicU64,
    /// Worker requests that hit the per-request timeout.
    pub worker_timeouts: AtomicU64,
    /// Worker requests that failed outright.
    pub worker_errors: AtomicU64,
    /// Islands cancelled by the global tick deadline.
    pub islands_cancelled: AtomicU64,
    /// Islands handed to the pool.
    pub islands_dispatched: AtomicU64,
    /// Commands applied successfully.
    pub commands_applied: AtomicU64,
    /// Bodies currently asleep.
    pub bodies_sleeping: AtomicU64,
}

impl SimMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            tick_overrun: self.tick_overrun.load(Ordering::Relaxed),
            cas_conflicts: self.cas_conflicts.load(Ordering::Relaxed),
            worker_timeouts: self.worker_timeouts.load(Ordering::Relaxed),
            worker_errors: self.worker_errors.load(Ordering::Relaxed),
            islands_cancelled: self.islands_cancelled.load(Ordering::Relaxed),
            islands_dispatched: self.islands_dispatched.load(Ordering::Relaxed),
            commands_applied: self.commands_applied.load(Ordering::Relaxed),
            bodies_sleeping: self.bodies_sleeping.load(Ordering::Relaxed),
        }
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub ticks: u64,
    pub tick_overrun: u64,
    pub cas_conflicts: u64,
    pub worker_timeouts: u64,
    pub worker_errors: u64,
    pub islands_cancelled: u64,
    pub islands_dispatched: u64,
    pub commands_applied: u64,
    pub bodies_sleeping: u64,
}
