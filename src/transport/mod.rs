//! # Transport Layer Abstraction
//!
//! This module provides a generic transport layer that abstracts over
//! broker implementations (NATS, RabbitMQ, Kafka, Redis, SQS, in-memory)
//! so the engine can move envelopes without knowing the underlying wire
//! protocol. Each broker is one adapter implementing [`TransportAdapter`],
//! selected at configuration time.

pub mod in_memory;

pub use in_memory::InMemoryAdapter;

use crate::error::Result;
use crate::messaging::envelope::MessageEnvelope;
use async_trait::async_trait;
use std::time::Duration;

/// Outcome of one handler invocation, classified at the handler boundary.
///
/// Handler errors never escape into adapter internals; they are converted
/// into this trichotomy by the consumer loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Message fully processed; acknowledge at the broker
    Ack,
    /// Permanent rejection; route straight to the dead letter router,
    /// bypassing the retry budget
    Nack { reason: String },
    /// Transient failure; route through the retry scheduler
    Retry { error: String },
}

impl HandlerOutcome {
    pub fn nack(reason: impl Into<String>) -> Self {
        Self::Nack {
            reason: reason.into(),
        }
    }

    pub fn retry(error: impl Into<String>) -> Self {
        Self::Retry {
            error: error.into(),
        }
    }
}

/// User-supplied message handler bound to one subscription
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, envelope: MessageEnvelope) -> HandlerOutcome;
}

/// Adapter for closure-based handlers
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(MessageEnvelope) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = HandlerOutcome> + Send,
{
    async fn handle(&self, envelope: MessageEnvelope) -> HandlerOutcome {
        (self.0)(envelope).await
    }
}

/// Opaque token identifying one in-flight delivery at the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryToken {
    pub(crate) subject: String,
    pub(crate) delivery_id: u64,
}

impl DeliveryToken {
    pub fn subject(&self) -> &str {
        &self.subject
    }
}

/// One message pulled from a subscription, decoded and ready to process
#[derive(Debug)]
pub struct InboundDelivery {
    pub envelope: MessageEnvelope,
    pub token: DeliveryToken,
}

/// Stream of deliveries for one subscribed subject
#[async_trait]
pub trait Subscription: Send {
    /// Receive the next delivery; `None` once the adapter is closed or
    /// the subscription is cancelled.
    async fn next_delivery(&mut self) -> Option<InboundDelivery>;

    fn subject(&self) -> &str;
}

/// Broker-facing contract implemented once per transport.
///
/// Adapters MUST deliver at least once whenever the broker guarantees it,
/// and MAY deliver duplicates; duplicate suppression is the delivery
/// tracker's job, not the adapter's. Adapters own their connection
/// lifecycle (connect, reconnect with backoff, graceful drain) and expose
/// none of it beyond [`TransportAdapter::close`].
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Publish an envelope to a subject
    async fn publish(&self, subject: &str, envelope: &MessageEnvelope) -> Result<()>;

    /// Publish after a delay.
    ///
    /// Default implementation sleeps on the caller's task and then
    /// publishes; adapters backed by brokers with native delayed delivery
    /// should override this to use the broker mechanism.
    async fn publish_delayed(
        &self,
        subject: &str,
        envelope: &MessageEnvelope,
        delay: Duration,
    ) -> Result<()> {
        tokio::time::sleep(delay).await;
        self.publish(subject, envelope).await
    }

    /// Open a subscription on a subject
    async fn subscribe(&self, subject: &str) -> Result<Box<dyn Subscription>>;

    /// Acknowledge a delivery as fully processed
    async fn ack(&self, token: &DeliveryToken) -> Result<()>;

    /// Negatively acknowledge a delivery (permanent rejection at the broker)
    async fn nack(&self, token: &DeliveryToken) -> Result<()>;

    /// Stop accepting publishes, wake subscriptions, and block until
    /// in-flight deliveries finish or the deadline elapses.
    async fn close(&self, deadline: Duration) -> Result<()>;
}
