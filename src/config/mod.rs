//! # Courier Configuration System
//!
//! YAML-based configuration with environment-specific overrides and
//! explicit validation. All tunables come from one validated structure
//! loaded at startup; there are no silent fallbacks and no dynamic
//! redefinition at runtime.
//!
//! ## Layout
//!
//! ```yaml
//! consumer:
//!   max_concurrency: 8
//!   handler_timeout_ms: 30000
//! delivery:
//!   ttl_ms: 600000
//!   stuck_threshold_ms: 60000
//!   eviction_interval_ms: 30000
//! circuit_breaker:
//!   failure_threshold: 5
//!   open_duration_ms: 30000
//!   probe_timeout_ms: 10000
//! retry_policies:
//!   - subject_pattern: "payments.>"
//!     base_delay_ms: 200
//!     max_delay_ms: 10000
//!     multiplier: 2.0
//!     max_attempts: 3
//!     jitter_fraction: 0.1
//! sagas:
//!   - name: order
//!     steps:
//!       - name: ReserveInventory
//!         forward_subject: inventory.reserve
//!         reply_subject: inventory.reserve.reply
//!         compensating_subject: inventory.release
//!         timeout_ms: 5000
//! environments:
//!   production:
//!     consumer:
//!       max_concurrency: 32
//! ```

use crate::consumer::ConsumerConfig;
use crate::delivery::DeliveryTrackerConfig;
use crate::error::{CourierError, Result};
use crate::resilience::CircuitBreakerConfig;
use crate::retry::{RetryPolicy, RetryPolicySet};
use crate::saga::SagaDefinition;
use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;
use std::path::Path;

/// Root configuration for the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub consumer: ConsumerConfig,
    pub delivery: DeliveryTrackerConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    /// First-match-wins against a message's subject
    pub retry_policies: Vec<RetryPolicy>,
    /// Applied when no pattern matches
    pub default_retry_policy: RetryPolicy,
    pub sagas: Vec<SagaDefinition>,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            consumer: ConsumerConfig::default(),
            delivery: DeliveryTrackerConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry_policies: Vec::new(),
            default_retry_policy: RetryPolicy::default(),
            sagas: Vec::new(),
        }
    }
}

impl CourierConfig {
    /// Parse configuration from YAML, applying the override section for
    /// `environment` when present
    pub fn from_yaml_str(yaml: &str, environment: &str) -> Result<Self> {
        let mut root: YamlValue = serde_yaml::from_str(yaml)
            .map_err(|e| CourierError::configuration("yaml", e.to_string()))?;

        if let YamlValue::Mapping(ref mut mapping) = root {
            let overrides = mapping.remove("environments").and_then(|envs| match envs {
                YamlValue::Mapping(mut envs) => envs.remove(environment),
                _ => None,
            });
            if let Some(overrides) = overrides {
                merge_yaml(&mut root, overrides);
            }
        }

        let config: CourierConfig = serde_yaml::from_value(root)
            .map_err(|e| CourierError::configuration("yaml", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file with environment auto-detected from
    /// `COURIER_ENV` (defaulting to `development`)
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let environment =
            std::env::var("COURIER_ENV").unwrap_or_else(|_| "development".to_string());
        let yaml = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            CourierError::configuration("loader", format!("{}: {e}", path.as_ref().display()))
        })?;
        Self::from_yaml_str(&yaml, &environment)
    }

    /// Explicit validation; rejects configurations that would violate
    /// engine invariants instead of silently misbehaving
    pub fn validate(&self) -> Result<()> {
        for policy in self
            .retry_policies
            .iter()
            .chain(std::iter::once(&self.default_retry_policy))
        {
            validate_policy(policy)?;
        }

        // The dedup window must outlive the worst-case redelivery delay,
        // otherwise a late redelivery would be mistaken for a new message.
        let max_delay = self.policy_set().max_configured_delay();
        if u128::from(self.delivery.ttl_ms) <= max_delay.as_millis() {
            return Err(CourierError::configuration(
                "delivery",
                format!(
                    "ttl_ms ({}) must exceed the largest retry max_delay_ms ({})",
                    self.delivery.ttl_ms,
                    max_delay.as_millis()
                ),
            ));
        }

        if self.consumer.max_concurrency == 0 {
            return Err(CourierError::configuration(
                "consumer",
                "max_concurrency must be at least 1",
            ));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(CourierError::configuration(
                "circuit_breaker",
                "failure_threshold must be at least 1",
            ));
        }

        for saga in &self.sagas {
            saga.validate()?;
        }
        Ok(())
    }

    pub fn policy_set(&self) -> RetryPolicySet {
        RetryPolicySet::new(self.retry_policies.clone())
            .with_default(self.default_retry_policy.clone())
    }
}

fn validate_policy(policy: &RetryPolicy) -> Result<()> {
    if policy.max_attempts == 0 {
        return Err(CourierError::configuration(
            "retry",
            format!("policy '{}': max_attempts must be at least 1", policy.subject_pattern),
        ));
    }
    if policy.multiplier < 1.0 {
        return Err(CourierError::configuration(
            "retry",
            format!("policy '{}': multiplier must be >= 1.0", policy.subject_pattern),
        ));
    }
    if !(0.0..=1.0).contains(&policy.jitter_fraction) {
        return Err(CourierError::configuration(
            "retry",
            format!("policy '{}': jitter_fraction must be within [0, 1]", policy.subject_pattern),
        ));
    }
    if policy.base_delay_ms > policy.max_delay_ms {
        return Err(CourierError::configuration(
            "retry",
            format!("policy '{}': base_delay_ms exceeds max_delay_ms", policy.subject_pattern),
        ));
    }
    Ok(())
}

/// Recursively merge `overrides` into `base`; mappings merge per key,
/// everything else is replaced wholesale
fn merge_yaml(base: &mut YamlValue, overrides: YamlValue) {
    match (base, overrides) {
        (YamlValue::Mapping(base_map), YamlValue::Mapping(override_map)) => {
            for (key, value) in override_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_yaml(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base_slot, replacement) => *base_slot = replacement,
    }
}
