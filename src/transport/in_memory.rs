//! # In-Memory Transport Adapter
//!
//! Reference adapter backed by per-subject ordered queues. Preserves the
//! at-least-once contract: a delivery stays tracked until acked or nacked,
//! and unacked deliveries can be redelivered. Test hooks allow duplicate
//! injection to exercise the delivery tracker.

use crate::error::{CourierError, Result};
use crate::messaging::envelope::MessageEnvelope;
use crate::transport::{DeliveryToken, InboundDelivery, Subscription, TransportAdapter};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

/// One ordered queue per subject, shared by all competing subscribers
struct SubjectQueue {
    deque: Mutex<VecDeque<InboundDelivery>>,
    notify: Notify,
}

impl SubjectQueue {
    fn new() -> Self {
        Self {
            deque: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    fn push(&self, delivery: InboundDelivery) {
        self.deque.lock().push_back(delivery);
        // The stored permit survives until the next notified().await, so a
        // push racing a pop cannot strand a waiter.
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<InboundDelivery> {
        self.deque.lock().pop_front()
    }

    fn len(&self) -> usize {
        self.deque.lock().len()
    }
}

/// In-memory broker with queue semantics (competing consumers per subject)
pub struct InMemoryAdapter {
    queues: DashMap<String, Arc<SubjectQueue>>,
    /// Deliveries handed to a subscriber but not yet acked/nacked
    unacked: Arc<DashMap<u64, MessageEnvelope>>,
    next_delivery_id: AtomicU64,
    closed: Arc<AtomicBool>,
}

impl InMemoryAdapter {
    pub fn new() -> Self {
        Self {
            queues: DashMap::new(),
            unacked: Arc::new(DashMap::new()),
            next_delivery_id: AtomicU64::new(1),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn queue(&self, subject: &str) -> Arc<SubjectQueue> {
        self.queues
            .entry(subject.to_string())
            .or_insert_with(|| Arc::new(SubjectQueue::new()))
            .clone()
    }

    fn enqueue(&self, subject: &str, envelope: MessageEnvelope) {
        let delivery_id = self.next_delivery_id.fetch_add(1, Ordering::Relaxed);
        let token = DeliveryToken {
            subject: subject.to_string(),
            delivery_id,
        };
        self.queue(subject).push(InboundDelivery { envelope, token });
    }

    /// Test hook: redeliver an envelope regardless of ack state, simulating
    /// a broker duplicate. This is exactly the case the delivery tracker
    /// exists to suppress.
    pub fn inject_duplicate(&self, subject: &str, envelope: MessageEnvelope) {
        debug!(subject = %subject, message_id = %envelope.id, "Injecting duplicate delivery");
        self.enqueue(subject, envelope);
    }

    /// Redeliver every delivery that was handed out but never acked or
    /// nacked, simulating broker visibility-timeout expiry.
    pub fn redeliver_unacked(&self) -> usize {
        let pending: Vec<MessageEnvelope> = self
            .unacked
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.unacked.clear();
        let count = pending.len();
        for envelope in pending {
            let subject = envelope.subject.clone();
            self.enqueue(&subject, envelope);
        }
        count
    }

    /// Number of deliveries currently awaiting ack/nack
    pub fn unacked_len(&self) -> usize {
        self.unacked.len()
    }

    /// Number of messages queued on a subject, for test assertions
    pub fn queued_len(&self, subject: &str) -> usize {
        self.queues.get(subject).map(|q| q.len()).unwrap_or(0)
    }
}

impl Default for InMemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

struct InMemorySubscription {
    subject: String,
    queue: Arc<SubjectQueue>,
    unacked: Arc<DashMap<u64, MessageEnvelope>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn next_delivery(&mut self) -> Option<InboundDelivery> {
        loop {
            if let Some(delivery) = self.queue.pop() {
                self.unacked
                    .insert(delivery.token.delivery_id, delivery.envelope.clone());
                return Some(delivery);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.queue.notify.notified().await;
        }
    }

    fn subject(&self) -> &str {
        &self.subject
    }
}

#[async_trait]
impl TransportAdapter for InMemoryAdapter {
    async fn publish(&self, subject: &str, envelope: &MessageEnvelope) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CourierError::AdapterClosed);
        }
        self.enqueue(subject, envelope.clone());
        debug!(
            subject = %subject,
            message_id = %envelope.id,
            attempt = envelope.attempt,
            "📨 Message published"
        );
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<Box<dyn Subscription>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CourierError::AdapterClosed);
        }
        Ok(Box::new(InMemorySubscription {
            subject: subject.to_string(),
            queue: self.queue(subject),
            unacked: self.unacked.clone(),
            closed: self.closed.clone(),
        }))
    }

    async fn ack(&self, token: &DeliveryToken) -> Result<()> {
        self.unacked.remove(&token.delivery_id);
        Ok(())
    }

    async fn nack(&self, token: &DeliveryToken) -> Result<()> {
        // Permanent rejection: drop from the unacked set without requeueing.
        // The dead letter router has already recorded the failure durably.
        self.unacked.remove(&token.delivery_id);
        Ok(())
    }

    async fn close(&self, deadline: Duration) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        for entry in self.queues.iter() {
            entry.value().notify.notify_waiters();
        }

        // Block until in-flight deliveries drain or the deadline elapses
        let started = Instant::now();
        while !self.unacked.is_empty() {
            if started.elapsed() >= deadline {
                warn!(
                    remaining = self.unacked.len(),
                    "Adapter close deadline elapsed with deliveries still in flight"
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(())
    }
}
