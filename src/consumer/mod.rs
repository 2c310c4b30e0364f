//! # Consumer Loop
//!
//! One worker per active subscription, with per-subject bounded
//! concurrency for backpressure. Control flow is a linear loop per
//! message: receive → idempotency check → invoke handler → classify
//! outcome → act. Handler failures are captured here and converted to the
//! Ack/Nack/Retry trichotomy; they never cross into adapter internals.

use crate::dead_letter::DeadLetterRouter;
use crate::delivery::{DeliveryDecision, DeliveryTracker};
use crate::messaging::envelope::MessageEnvelope;
use crate::metrics::EngineMetrics;
use crate::retry::RetryScheduler;
use crate::transport::{DeliveryToken, HandlerOutcome, MessageHandler, Subscription, TransportAdapter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Per-subscription worker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Maximum concurrent in-flight handlers for this subject. Per-subject
    /// ordering is only preserved with a value of 1 over an ordered queue;
    /// the engine surfaces the transport's native guarantee unchanged.
    pub max_concurrency: usize,
    /// Per-message-class handler timeout
    pub handler_timeout_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            handler_timeout_ms: 30_000,
        }
    }
}

impl ConsumerConfig {
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }
}

/// Shared components every subscription worker needs
#[derive(Clone)]
pub struct ConsumerContext {
    pub adapter: Arc<dyn TransportAdapter>,
    pub tracker: Arc<DeliveryTracker>,
    pub scheduler: Arc<RetryScheduler>,
    pub dead_letters: Arc<DeadLetterRouter>,
    pub metrics: Arc<EngineMetrics>,
}

/// Spawn the worker task driving one subscription until shutdown
pub fn spawn_subscription_worker(
    mut subscription: Box<dyn Subscription>,
    handler: Arc<dyn MessageHandler>,
    context: ConsumerContext,
    config: ConsumerConfig,
    shutdown: broadcast::Sender<()>,
) -> JoinHandle<()> {
    let subject = subscription.subject().to_string();
    let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));

    tokio::spawn(async move {
        info!(
            subject = %subject,
            max_concurrency = config.max_concurrency,
            "👷 Subscription worker started"
        );
        let mut shutdown_rx = shutdown.subscribe();
        loop {
            let delivery = tokio::select! {
                _ = shutdown_rx.recv() => break,
                delivery = subscription.next_delivery() => match delivery {
                    Some(delivery) => delivery,
                    None => break,
                },
            };

            // Backpressure: wait for a slot before taking another message
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let handler = Arc::clone(&handler);
            let context = context.clone();
            let cancel = shutdown.subscribe();
            let timeout = config.handler_timeout();
            tokio::spawn(async move {
                process_delivery(delivery.envelope, delivery.token, handler, context, timeout, cancel)
                    .await;
                drop(permit);
            });
        }
        info!(subject = %subject, "👷 Subscription worker stopped");
    })
}

/// The linear per-message pipeline
async fn process_delivery(
    envelope: MessageEnvelope,
    token: DeliveryToken,
    handler: Arc<dyn MessageHandler>,
    context: ConsumerContext,
    handler_timeout: Duration,
    mut cancel: broadcast::Receiver<()>,
) {
    let key = envelope.idempotency_key.clone();

    match context.tracker.check_and_mark(&key) {
        DeliveryDecision::Duplicate(_) => {
            // Duplicate suppression, not reprocessing: skip the handler and
            // ack the underlying transport message immediately.
            debug!(
                subject = %envelope.subject,
                message_id = %envelope.id,
                idempotency_key = %key,
                "♻️ Duplicate delivery suppressed"
            );
            context.metrics.record_duplicate_suppressed();
            ack(&context, &token).await;
            return;
        }
        DeliveryDecision::InFlight => {
            // Another worker holds this key right now; transient, let the
            // retry scheduler bring the message back later.
            debug!(
                subject = %envelope.subject,
                idempotency_key = %key,
                "Delivery for in-flight key deferred"
            );
            dispose_retry(&context, envelope, "idempotency key in flight", &token).await;
            return;
        }
        DeliveryDecision::Reclaimed => {
            warn!(
                subject = %envelope.subject,
                idempotency_key = %key,
                "Reclaimed stuck pending delivery"
            );
        }
        DeliveryDecision::Fresh => {}
    }

    // The handler invocation is the only user-supplied blocking point. It
    // is bounded by the per-message-class timeout and cancelled on
    // shutdown; both are classified Retry, not Nack, since the work may
    // have partially completed.
    let outcome = tokio::select! {
        outcome = tokio::time::timeout(handler_timeout, handler.handle(envelope.clone())) => {
            match outcome {
                Ok(outcome) => outcome,
                Err(_elapsed) => HandlerOutcome::retry(format!(
                    "handler timed out after {}ms",
                    handler_timeout.as_millis()
                )),
            }
        }
        _ = cancel.recv() => HandlerOutcome::retry("shutdown requested during handler execution"),
    };

    match outcome {
        HandlerOutcome::Ack => {
            context.tracker.mark_completed(&key);
            context.metrics.record_processed();
            debug!(
                subject = %envelope.subject,
                message_id = %envelope.id,
                "✅ Message processed"
            );
            ack(&context, &token).await;
        }
        HandlerOutcome::Nack { reason } => {
            // Permanent rejection: straight to quarantine, retry budget
            // skipped.
            warn!(
                subject = %envelope.subject,
                message_id = %envelope.id,
                reason = %reason,
                "Message permanently rejected by handler"
            );
            context.tracker.mark_failed(&key);
            match context
                .dead_letters
                .quarantine(envelope, "permanent rejection", Some(reason))
                .await
            {
                Ok(_) => ack(&context, &token).await,
                Err(err) => {
                    // Leave the delivery unacked so the broker redelivers;
                    // a rejection with no dead letter record must not drop.
                    error!(error = %err, "Failed to quarantine rejected message; delivery left unacked");
                }
            }
        }
        HandlerOutcome::Retry { error: reason } => {
            context.tracker.mark_failed(&key);
            dispose_retry(&context, envelope, &reason, &token).await;
        }
    }
}

/// Route a transient failure through the retry scheduler and release the
/// original delivery (the scheduled republish now owns redelivery).
async fn dispose_retry(
    context: &ConsumerContext,
    envelope: MessageEnvelope,
    reason: &str,
    token: &DeliveryToken,
) {
    match context.scheduler.handle_retry(envelope, reason).await {
        Ok(_) => ack(context, token).await,
        Err(err) => {
            // Nothing was scheduled or quarantined; keep the delivery
            // unacked so the broker redelivers.
            error!(error = %err, "Retry scheduling failed; delivery left unacked");
        }
    }
}

async fn ack(context: &ConsumerContext, token: &DeliveryToken) {
    if let Err(err) = context.adapter.ack(token).await {
        error!(subject = %token.subject(), error = %err, "Failed to ack delivery");
    }
}
