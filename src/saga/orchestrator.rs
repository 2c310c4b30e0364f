//! # Saga Orchestrator
//!
//! Drives saga instances over the messaging stack. Each forward or
//! compensating action is one command publish plus one awaited reply; the
//! command is processed by the normal consumer pipeline on the service
//! side, so message-level retry, dead-lettering, and idempotent
//! re-execution all apply to saga commands exactly as to any other
//! message.

use crate::delivery::{DeliveryDecision, DeliveryTracker};
use crate::error::{CourierError, Result};
use crate::messaging::envelope::MessageEnvelope;
use crate::metrics::EngineMetrics;
use crate::saga::definition::{SagaDefinitionRegistry, SagaStepDefinition};
use crate::saga::instance::{SagaInstance, SagaState};
use crate::saga::reply::{
    SagaReply, ATTR_CORRELATION_ID, ATTR_REPLY_TO, ATTR_SAGA_ID, ATTR_SAGA_STEP,
};
use crate::saga::{action_idempotency_key, ActionDirection};
use crate::transport::TransportAdapter;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Executes saga definitions and routes step replies back to the awaiting
/// instance. Different instances run fully in parallel; the steps of one
/// instance are strictly sequential.
pub struct SagaOrchestrator {
    adapter: Arc<dyn TransportAdapter>,
    tracker: Arc<DeliveryTracker>,
    metrics: Arc<EngineMetrics>,
    definitions: Arc<SagaDefinitionRegistry>,
    /// Waiting step executions keyed by correlation id
    waiters: Arc<DashMap<String, oneshot::Sender<SagaReply>>>,
    /// One reply pump per reply subject, created lazily
    pumps: DashMap<String, JoinHandle<()>>,
    pump_creation: Mutex<()>,
    shutdown: broadcast::Sender<()>,
}

impl SagaOrchestrator {
    pub fn new(
        adapter: Arc<dyn TransportAdapter>,
        tracker: Arc<DeliveryTracker>,
        metrics: Arc<EngineMetrics>,
        definitions: Arc<SagaDefinitionRegistry>,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            adapter,
            tracker,
            metrics,
            definitions,
            waiters: Arc::new(DashMap::new()),
            pumps: DashMap::new(),
            pump_creation: Mutex::new(()),
            shutdown,
        }
    }

    /// Run one saga to a terminal state. Returns the terminal instance;
    /// a saga that failed and compensated is a normal outcome, not an
    /// engine error.
    pub async fn execute(
        &self,
        definition_name: &str,
        initial_context: HashMap<String, String>,
    ) -> Result<SagaInstance> {
        let definition = self.definitions.get(definition_name)?;
        let mut instance = SagaInstance::new(definition_name, initial_context);
        info!(
            saga_id = %instance.saga_id,
            definition = %definition_name,
            steps = definition.steps.len(),
            "🎬 Saga started"
        );

        for subject in definition
            .steps
            .iter()
            .map(|s| s.reply_subject.clone())
            .collect::<std::collections::HashSet<_>>()
        {
            self.ensure_reply_pump(&subject).await?;
        }

        for (index, step) in definition.steps.iter().enumerate() {
            match self
                .run_action(&instance, step, index, ActionDirection::Forward)
                .await
            {
                Ok(output) => {
                    debug!(
                        saga_id = %instance.saga_id,
                        step = %step.name,
                        "Saga step completed"
                    );
                    instance.record_step_completed(&step.name, output)?;
                }
                Err(reason) => {
                    warn!(
                        saga_id = %instance.saga_id,
                        step = %step.name,
                        reason = %reason,
                        "Saga step failed, starting compensation"
                    );
                    instance.begin_compensation()?;
                    self.compensate(&mut instance, &definition.steps).await;
                    instance.fail()?;
                    self.metrics.record_saga_failed();
                    info!(
                        saga_id = %instance.saga_id,
                        definition = %instance.definition_name,
                        "Saga failed after compensation"
                    );
                    return Ok(instance);
                }
            }
        }

        instance.complete()?;
        self.metrics.record_saga_completed();
        info!(saga_id = %instance.saga_id, definition = %definition_name, "🎉 Saga completed");
        Ok(instance)
    }

    /// Best-effort compensation sweep over completed steps in reverse
    /// order. A failed compensation is surfaced as a critical alert with
    /// full saga context but never aborts the sweep.
    async fn compensate(&self, instance: &mut SagaInstance, steps: &[SagaStepDefinition]) {
        for completed in instance.completed_steps.clone().iter().rev() {
            let step = &steps[completed.step_index];
            self.metrics.record_compensation_run();
            match self
                .run_action(instance, step, completed.step_index, ActionDirection::Compensate)
                .await
            {
                Ok(_) => {
                    debug!(
                        saga_id = %instance.saga_id,
                        step = %step.name,
                        "Compensation completed"
                    );
                }
                Err(reason) => {
                    // Critical operational alert: the saga is now partially
                    // compensated and needs operator attention.
                    error!(
                        saga_id = %instance.saga_id,
                        definition = %instance.definition_name,
                        step = %step.name,
                        step_index = completed.step_index,
                        completed_steps = instance.completed_steps.len(),
                        state = ?SagaState::Compensating,
                        reason = %reason,
                        "🚨 CRITICAL: saga compensation failed, continuing sweep"
                    );
                }
            }
        }
    }

    /// Publish one saga action and await its reply within the step
    /// timeout. Returns the reply output on success, or the failure
    /// reason. Errors here are saga-step failures, not engine errors.
    async fn run_action(
        &self,
        instance: &SagaInstance,
        step: &SagaStepDefinition,
        step_index: usize,
        direction: ActionDirection,
    ) -> std::result::Result<HashMap<String, String>, String> {
        let subject = match direction {
            ActionDirection::Forward => &step.forward_subject,
            ActionDirection::Compensate => &step.compensating_subject,
        };
        let correlation_id = action_idempotency_key(&instance.saga_id, step_index, direction);

        let (tx, rx) = oneshot::channel();
        self.waiters.insert(correlation_id.clone(), tx);

        let payload = serde_json::to_vec(&instance.context)
            .map_err(|e| format!("failed to encode saga context: {e}"))?;
        let command = MessageEnvelope::new(subject.clone(), payload)
            .with_idempotency_key(correlation_id.clone())
            .with_attribute(ATTR_SAGA_ID, instance.saga_id.clone())
            .with_attribute(ATTR_SAGA_STEP, step.name.clone())
            .with_attribute(ATTR_REPLY_TO, step.reply_subject.clone())
            .with_attribute(ATTR_CORRELATION_ID, correlation_id.clone());

        if let Err(err) = self.adapter.publish(subject, &command).await {
            self.waiters.remove(&correlation_id);
            return Err(format!("failed to publish saga command: {err}"));
        }

        match tokio::time::timeout(step.timeout(), rx).await {
            Ok(Ok(reply)) if reply.is_completed() => Ok(reply.output),
            Ok(Ok(reply)) => Err(reply
                .error
                .unwrap_or_else(|| "step reported failure".to_string())),
            Ok(Err(_closed)) => {
                self.waiters.remove(&correlation_id);
                Err("orchestrator shutting down".to_string())
            }
            Err(_elapsed) => {
                self.waiters.remove(&correlation_id);
                Err(format!(
                    "no reply on {} within {}ms",
                    step.reply_subject, step.timeout_ms
                ))
            }
        }
    }

    /// Start the reply pump for a subject if it is not running yet.
    ///
    /// Creation is serialized so two concurrent sagas cannot open
    /// competing subscriptions on the same reply queue.
    async fn ensure_reply_pump(&self, subject: &str) -> Result<()> {
        if self.pumps.contains_key(subject) {
            return Ok(());
        }
        let _guard = self.pump_creation.lock().await;
        if self.pumps.contains_key(subject) {
            return Ok(());
        }

        let mut subscription = self.adapter.subscribe(subject).await?;
        let adapter = Arc::clone(&self.adapter);
        let tracker = Arc::clone(&self.tracker);
        let waiters = Arc::clone(&self.waiters);
        let mut shutdown = self.shutdown.subscribe();
        let pump_subject = subject.to_string();

        let handle = tokio::spawn(async move {
            loop {
                let delivery = tokio::select! {
                    _ = shutdown.recv() => break,
                    delivery = subscription.next_delivery() => match delivery {
                        Some(delivery) => delivery,
                        None => break,
                    },
                };
                let envelope = delivery.envelope;
                let key = envelope.idempotency_key.clone();

                // Replies are tracked deliveries too: step completion is
                // idempotent under redelivered replies.
                match tracker.check_and_mark(&key) {
                    DeliveryDecision::Duplicate(_) | DeliveryDecision::InFlight => {
                        let _ = adapter.ack(&delivery.token).await;
                        continue;
                    }
                    DeliveryDecision::Fresh | DeliveryDecision::Reclaimed => {}
                }

                match route_reply(&waiters, &envelope) {
                    Ok(()) => tracker.mark_completed(&key),
                    Err(err) => {
                        warn!(
                            subject = %pump_subject,
                            message_id = %envelope.id,
                            error = %err,
                            "Discarding unroutable saga reply"
                        );
                        tracker.mark_completed(&key);
                    }
                }
                let _ = adapter.ack(&delivery.token).await;
            }
            debug!(subject = %pump_subject, "Saga reply pump stopped");
        });
        self.pumps.insert(subject.to_string(), handle);
        Ok(())
    }
}

fn route_reply(
    waiters: &DashMap<String, oneshot::Sender<SagaReply>>,
    envelope: &MessageEnvelope,
) -> Result<()> {
    let correlation_id = envelope
        .attribute(ATTR_CORRELATION_ID)
        .ok_or_else(|| CourierError::internal("saga reply missing correlationId"))?;
    let reply = SagaReply::from_envelope(envelope)?;
    let (_, tx) = waiters
        .remove(correlation_id)
        .ok_or_else(|| CourierError::internal("no saga step awaiting this correlationId"))?;
    tx.send(reply)
        .map_err(|_| CourierError::internal("awaiting saga step already gave up"))
}
