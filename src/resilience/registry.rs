//! Shared circuit breaker registry keyed by resource name.
//!
//! All subscriptions calling the same downstream resource share one
//! breaker instance, so failures observed by one worker protect every
//! other worker immediately.

use crate::metrics::EngineMetrics;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use dashmap::DashMap;
use std::sync::Arc;

pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: CircuitBreakerConfig,
    metrics: Arc<EngineMetrics>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig, metrics: Arc<EngineMetrics>) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
            metrics,
        }
    }

    /// Get or create the shared breaker for a resource
    pub fn breaker(&self, resource: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(resource.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    resource,
                    self.config.clone(),
                    Arc::clone(&self.metrics),
                ))
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_resource_shares_breaker() {
        let registry =
            CircuitBreakerRegistry::new(CircuitBreakerConfig::default(), Arc::new(EngineMetrics::new()));
        let a = registry.breaker("payment_gateway");
        let b = registry.breaker("payment_gateway");
        let c = registry.breaker("inventory_service");

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.len(), 2);
    }
}
