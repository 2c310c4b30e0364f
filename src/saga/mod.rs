//! # Saga Orchestration
//!
//! Executes multi-step distributed transactions over the messaging stack:
//! each step publishes a command and awaits a reply as a tracked,
//! idempotent delivery; on partial failure, compensations run in reverse
//! order of the steps that completed, best-effort.

pub mod definition;
pub mod instance;
pub mod orchestrator;
pub mod reply;

pub use definition::{SagaDefinition, SagaDefinitionRegistry, SagaStepDefinition};
pub use instance::{CompletedStep, SagaInstance, SagaState};
pub use orchestrator::SagaOrchestrator;
pub use reply::{SagaReply, SagaReplyStatus};

/// Direction of a saga action, part of the derived idempotency key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionDirection {
    Forward,
    Compensate,
}

impl ActionDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionDirection::Forward => "forward",
            ActionDirection::Compensate => "compensate",
        }
    }
}

/// Deterministic idempotency key for one saga action, safe to re-execute
/// after a crash: `saga:{saga_id}:{step_index}:{direction}`
pub fn action_idempotency_key(saga_id: &str, step_index: usize, direction: ActionDirection) -> String {
    format!("saga:{saga_id}:{step_index}:{}", direction.as_str())
}
