//! # Engine Metrics
//!
//! Atomic counters for the observability surface: messages processed,
//! duplicates suppressed, retries scheduled, dead-lettered messages,
//! circuit breaker transitions, and saga completions/failures. Exposed
//! as a serializable snapshot for an external metrics collector.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared atomic counters mutated by every component in the engine
#[derive(Debug, Default)]
pub struct EngineMetrics {
    messages_processed: AtomicU64,
    duplicates_suppressed: AtomicU64,
    retries_scheduled: AtomicU64,
    messages_dead_lettered: AtomicU64,
    circuit_transitions: AtomicU64,
    sagas_completed: AtomicU64,
    sagas_failed: AtomicU64,
    compensations_run: AtomicU64,
}

/// Point-in-time view of the engine counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub messages_processed: u64,
    pub duplicates_suppressed: u64,
    pub retries_scheduled: u64,
    pub messages_dead_lettered: u64,
    pub circuit_transitions: u64,
    pub sagas_completed: u64,
    pub sagas_failed: u64,
    pub compensations_run: u64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_processed(&self) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate_suppressed(&self) {
        self.duplicates_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry_scheduled(&self) {
        self.retries_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_lettered(&self) {
        self.messages_dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_circuit_transition(&self) {
        self.circuit_transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_saga_completed(&self) {
        self.sagas_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_saga_failed(&self) {
        self.sagas_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compensation_run(&self) {
        self.compensations_run.fetch_add(1, Ordering::Relaxed);
    }

    /// Capture current counter values for an external collector
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            duplicates_suppressed: self.duplicates_suppressed.load(Ordering::Relaxed),
            retries_scheduled: self.retries_scheduled.load(Ordering::Relaxed),
            messages_dead_lettered: self.messages_dead_lettered.load(Ordering::Relaxed),
            circuit_transitions: self.circuit_transitions.load(Ordering::Relaxed),
            sagas_completed: self.sagas_completed.load(Ordering::Relaxed),
            sagas_failed: self.sagas_failed.load(Ordering::Relaxed),
            compensations_run: self.compensations_run.load(Ordering::Relaxed),
        }
    }
}
