//! # Resilience Module
//!
//! Circuit breaker protection for downstream calls made by message
//! handlers. Breakers are shared across subscriptions keyed by resource
//! name, so every handler calling the same downstream service observes
//! the same state. This is the mechanism that keeps handler call failures
//! from cascading into retry storms against a struggling dependency.

pub mod circuit_breaker;
pub mod registry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
pub use registry::CircuitBreakerRegistry;
