//! Mutable run record for one saga execution.
//!
//! A saga instance is owned exclusively by the single logical execution
//! driving it; concurrent steps of the same saga never run in parallel.
//! Terminal states are final: no transitions leave Completed or Failed.

use crate::error::{CourierError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

/// Saga lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SagaState {
    Running,
    Compensating,
    Completed,
    Failed,
}

impl SagaState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SagaState::Completed | SagaState::Failed)
    }
}

/// Result of one finished forward step, append-only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedStep {
    pub step_index: usize,
    pub step_name: String,
    pub output: HashMap<String, String>,
    pub completed_at: DateTime<Utc>,
}

/// Run record for one saga execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaInstance {
    pub saga_id: String,
    pub definition_name: String,
    pub current_step_index: usize,
    pub completed_steps: Vec<CompletedStep>,
    pub state: SagaState,
    /// Accumulated step outputs, write-once per key
    pub context: HashMap<String, String>,
}

impl SagaInstance {
    pub fn new(definition_name: impl Into<String>, initial_context: HashMap<String, String>) -> Self {
        Self {
            saga_id: Uuid::new_v4().to_string(),
            definition_name: definition_name.into(),
            current_step_index: 0,
            completed_steps: Vec::new(),
            state: SagaState::Running,
            context: initial_context,
        }
    }

    /// Append a completed forward step, merge its output into the context
    /// (write-once per key), and advance the step cursor
    pub fn record_step_completed(
        &mut self,
        step_name: &str,
        output: HashMap<String, String>,
    ) -> Result<()> {
        self.ensure_state(SagaState::Running, "record step completion")?;
        for (key, value) in &output {
            if self.context.contains_key(key) {
                warn!(
                    saga_id = %self.saga_id,
                    key = %key,
                    "Saga context key already set; keeping first value"
                );
            } else {
                self.context.insert(key.clone(), value.clone());
            }
        }
        self.completed_steps.push(CompletedStep {
            step_index: self.current_step_index,
            step_name: step_name.to_string(),
            output,
            completed_at: Utc::now(),
        });
        self.current_step_index += 1;
        Ok(())
    }

    /// `Running -> Compensating` on forward-step failure
    pub fn begin_compensation(&mut self) -> Result<()> {
        self.ensure_state(SagaState::Running, "begin compensation")?;
        self.state = SagaState::Compensating;
        Ok(())
    }

    /// `Running -> Completed` once every forward step finished
    pub fn complete(&mut self) -> Result<()> {
        self.ensure_state(SagaState::Running, "complete saga")?;
        self.state = SagaState::Completed;
        Ok(())
    }

    /// `Compensating -> Failed` after the compensation sweep
    pub fn fail(&mut self) -> Result<()> {
        self.ensure_state(SagaState::Compensating, "fail saga")?;
        self.state = SagaState::Failed;
        Ok(())
    }

    fn ensure_state(&self, expected: SagaState, action: &str) -> Result<()> {
        if self.state != expected {
            return Err(CourierError::saga(
                self.saga_id.clone(),
                format!("cannot {action} from state {:?}", self.state),
            ));
        }
        Ok(())
    }
}
