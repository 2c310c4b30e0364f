//! # Circuit Breaker Implementation
//!
//! Classic three-state circuit breaker: Closed (normal operation), Open
//! (failing fast), HalfOpen (testing recovery). While HalfOpen, exactly
//! one probe call is allowed through at a time; all other callers fail
//! fast until the probe resolves. The probe itself is time-bounded and
//! the breaker is released back to Open if it does not resolve in time.

use crate::metrics::EngineMetrics;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed = 0,
    /// Failure mode - all calls fail fast without executing
    Open = 1,
    /// Testing recovery - a single probe call allowed through
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            2 => CircuitState::HalfOpen,
            // Default to the safest state
            _ => CircuitState::Open,
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip Closed -> Open
    pub failure_threshold: u32,
    /// How long the circuit stays Open before allowing a probe
    pub open_duration_ms: u64,
    /// Upper bound on the HalfOpen probe; on expiry the breaker returns
    /// to Open
    pub probe_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration_ms: 30_000,
            probe_timeout_ms: 10_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn open_duration(&self) -> Duration {
        Duration::from_millis(self.open_duration_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open (or the single probe slot is taken); the guarded
    /// function was NOT invoked. Distinct from a true downstream failure
    /// so callers can apply their own fallback.
    #[error("Circuit breaker is open for {resource}")]
    CircuitOpen { resource: String },

    /// The guarded operation ran and failed; the failure was recorded
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

/// Core circuit breaker with atomic state management
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Resource name for logging and keying
    resource: String,
    /// Current circuit state (atomic for thread safety)
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    /// Gates the single HalfOpen probe
    probe_in_flight: AtomicBool,
    /// Time when the circuit was opened
    opened_at: Mutex<Option<Instant>>,
    config: CircuitBreakerConfig,
    metrics: Arc<EngineMetrics>,
}

impl CircuitBreaker {
    pub fn new(
        resource: impl Into<String>,
        config: CircuitBreakerConfig,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        let resource = resource.into();
        info!(
            resource = %resource,
            failure_threshold = config.failure_threshold,
            open_duration_ms = config.open_duration_ms,
            "🛡️ Circuit breaker initialized"
        );
        Self {
            resource,
            state: AtomicU8::new(CircuitState::Closed as u8),
            consecutive_failures: AtomicU32::new(0),
            probe_in_flight: AtomicBool::new(false),
            opened_at: Mutex::new(None),
            config,
            metrics,
        }
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Execute an operation with circuit breaker protection.
    ///
    /// While Open, fails fast with [`CircuitBreakerError::CircuitOpen`]
    /// without invoking the operation.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.state() {
            CircuitState::Closed => {
                let result = operation().await;
                self.record_result(result.is_ok(), false);
                result.map_err(CircuitBreakerError::OperationFailed)
            }
            CircuitState::Open => {
                if self.open_duration_elapsed() {
                    self.transition_to_half_open();
                    self.run_probe(operation).await
                } else {
                    Err(CircuitBreakerError::CircuitOpen {
                        resource: self.resource.clone(),
                    })
                }
            }
            CircuitState::HalfOpen => self.run_probe(operation).await,
        }
    }

    /// Attempt the single HalfOpen probe; callers losing the race fail fast
    async fn run_probe<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if self
            .probe_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CircuitBreakerError::CircuitOpen {
                resource: self.resource.clone(),
            });
        }

        debug!(resource = %self.resource, "Half-open probe allowed through");
        let outcome = tokio::time::timeout(self.config.probe_timeout(), operation()).await;
        self.probe_in_flight.store(false, Ordering::Release);

        match outcome {
            Ok(result) => {
                self.record_result(result.is_ok(), true);
                result.map_err(CircuitBreakerError::OperationFailed)
            }
            Err(_elapsed) => {
                warn!(
                    resource = %self.resource,
                    probe_timeout_ms = self.config.probe_timeout_ms,
                    "Half-open probe timed out, reopening circuit"
                );
                self.transition_to_open();
                Err(CircuitBreakerError::CircuitOpen {
                    resource: self.resource.clone(),
                })
            }
        }
    }

    fn open_duration_elapsed(&self) -> bool {
        let opened_at = *self.opened_at.lock();
        opened_at
            .map(|opened| opened.elapsed() >= self.config.open_duration())
            .unwrap_or(true)
    }

    fn record_result(&self, success: bool, probe: bool) {
        if success {
            if probe {
                self.transition_to_closed();
            } else {
                self.consecutive_failures.store(0, Ordering::Release);
            }
            debug!(resource = %self.resource, "🟢 Guarded operation succeeded");
        } else if probe {
            // Any probe failure immediately reopens the circuit
            self.transition_to_open();
        } else {
            let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
            error!(
                resource = %self.resource,
                consecutive_failures = failures,
                "🔴 Guarded operation failed"
            );
            if failures >= self.config.failure_threshold {
                self.transition_to_open();
            }
        }
    }

    fn transition_to_closed(&self) {
        self.state.store(CircuitState::Closed as u8, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
        *self.opened_at.lock() = None;
        self.metrics.record_circuit_transition();
        info!(resource = %self.resource, "🟢 Circuit breaker closed (recovered)");
    }

    fn transition_to_open(&self) {
        self.state.store(CircuitState::Open as u8, Ordering::Release);
        *self.opened_at.lock() = Some(Instant::now());
        self.metrics.record_circuit_transition();
        error!(
            resource = %self.resource,
            failure_threshold = self.config.failure_threshold,
            open_duration_ms = self.config.open_duration_ms,
            "🔴 Circuit breaker opened (failing fast)"
        );
    }

    fn transition_to_half_open(&self) {
        self.state
            .store(CircuitState::HalfOpen as u8, Ordering::Release);
        self.metrics.record_circuit_transition();
        info!(resource = %self.resource, "🟡 Circuit breaker half-open (testing recovery)");
    }

    /// Force circuit to open state (for emergency situations)
    pub fn force_open(&self) {
        warn!(resource = %self.resource, "🚨 Circuit breaker forced open");
        self.transition_to_open();
    }

    /// Force circuit to closed state (for emergency recovery)
    pub fn force_closed(&self) {
        warn!(resource = %self.resource, "🚨 Circuit breaker forced closed");
        self.transition_to_closed();
    }
}
