//! Declarative saga definitions, loaded at process startup and never
//! mutated at runtime.

use crate::error::{CourierError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// One step: a transport publish bound to an expected reply subject plus
/// the compensating publish that undoes it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaStepDefinition {
    pub name: String,
    pub forward_subject: String,
    pub reply_subject: String,
    pub compensating_subject: String,
    /// How long to wait for each reply
    pub timeout_ms: u64,
}

impl SagaStepDefinition {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Ordered, immutable sequence of steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaDefinition {
    pub name: String,
    pub steps: Vec<SagaStepDefinition>,
}

impl SagaDefinition {
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(CourierError::configuration(
                "saga",
                format!("saga definition '{}' has no steps", self.name),
            ));
        }
        for step in &self.steps {
            if step.timeout_ms == 0 {
                return Err(CourierError::configuration(
                    "saga",
                    format!("step '{}' of saga '{}' has zero timeout", step.name, self.name),
                ));
            }
        }
        Ok(())
    }
}

/// Startup-loaded registry of definitions; no dynamic redefinition
#[derive(Debug, Default)]
pub struct SagaDefinitionRegistry {
    definitions: HashMap<String, Arc<SagaDefinition>>,
}

impl SagaDefinitionRegistry {
    pub fn new(definitions: Vec<SagaDefinition>) -> Result<Self> {
        let mut map = HashMap::new();
        for definition in definitions {
            definition.validate()?;
            if map
                .insert(definition.name.clone(), Arc::new(definition))
                .is_some()
            {
                return Err(CourierError::configuration(
                    "saga",
                    "duplicate saga definition name",
                ));
            }
        }
        Ok(Self { definitions: map })
    }

    pub fn get(&self, name: &str) -> Result<Arc<SagaDefinition>> {
        self.definitions
            .get(name)
            .cloned()
            .ok_or_else(|| CourierError::UnknownSagaDefinition {
                definition: name.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
