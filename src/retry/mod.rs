//! # Retry Scheduler
//!
//! Computes bounded exponential backoff with jitter per message class and
//! routes exhausted messages to the dead letter router. This component
//! never inspects the message payload; only the envelope attempt counter
//! and the matched policy drive the decision.

use crate::dead_letter::DeadLetterRouter;
use crate::error::Result;
use crate::messaging::envelope::MessageEnvelope;
use crate::metrics::EngineMetrics;
use crate::transport::TransportAdapter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Immutable per-message-class retry policy, loaded once at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// NATS-style subject pattern: `.` separated tokens, `*` matches one
    /// token, `>` matches the remaining tokens
    pub subject_pattern: String,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub max_attempts: u32,
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            subject_pattern: ">".to_string(),
            base_delay_ms: 100,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            max_attempts: 5,
            jitter_fraction: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Backoff before jitter: `min(max_delay, base_delay * multiplier^attempt)`,
    /// never below `base_delay`. Monotone non-decreasing in `attempt`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let raw = self
            .base_delay()
            .mul_f64(self.multiplier.powi(attempt as i32));
        raw.clamp(self.base_delay(), self.max_delay())
    }

    /// Backoff with jitter applied: `delay * (1 ± jitter_fraction * random())`,
    /// clamped so the result stays within `[base_delay, max_delay]` (ties
    /// round toward `max_delay`).
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.backoff_delay(attempt);
        if self.jitter_fraction <= 0.0 {
            return delay;
        }
        let spread = self.jitter_fraction * (2.0 * fastrand::f64() - 1.0);
        delay
            .mul_f64(1.0 + spread)
            .clamp(self.base_delay(), self.max_delay())
    }

    /// Whether this policy's pattern matches a subject
    pub fn matches(&self, subject: &str) -> bool {
        subject_matches(&self.subject_pattern, subject)
    }
}

/// NATS-style subject matching
fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.').peekable();
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), _) => return pattern_tokens.peek().is_none(),
            (Some("*"), Some(_)) => {}
            (Some(token), Some(actual)) if token == actual => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// First-match-wins policy resolution against a message's subject
#[derive(Debug, Clone, Default)]
pub struct RetryPolicySet {
    policies: Vec<RetryPolicy>,
    default_policy: RetryPolicy,
}

impl RetryPolicySet {
    pub fn new(policies: Vec<RetryPolicy>) -> Self {
        Self {
            policies,
            default_policy: RetryPolicy::default(),
        }
    }

    pub fn with_default(mut self, default_policy: RetryPolicy) -> Self {
        self.default_policy = default_policy;
        self
    }

    pub fn policy_for(&self, subject: &str) -> &RetryPolicy {
        self.policies
            .iter()
            .find(|p| p.matches(subject))
            .unwrap_or(&self.default_policy)
    }

    /// Largest max_delay across all policies, used to validate the
    /// delivery tracker TTL covers the worst-case redelivery delay
    pub fn max_configured_delay(&self) -> Duration {
        self.policies
            .iter()
            .map(RetryPolicy::max_delay)
            .chain(std::iter::once(self.default_policy.max_delay()))
            .max()
            .unwrap_or_default()
    }
}

/// Where a transient failure ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDisposition {
    /// Redelivery scheduled after the computed delay
    Scheduled { attempt: u32, delay: Duration },
    /// Retry budget exhausted; message quarantined
    DeadLettered { entry_id: String },
}

/// Schedules backed-off redeliveries through the transport adapter
pub struct RetryScheduler {
    adapter: Arc<dyn TransportAdapter>,
    policies: Arc<RetryPolicySet>,
    dead_letters: Arc<DeadLetterRouter>,
    metrics: Arc<EngineMetrics>,
    shutdown: broadcast::Sender<()>,
    /// Republish tasks waiting out their backoff; drained on shutdown so
    /// a closing adapter never strands a scheduled redelivery
    in_flight: Mutex<Vec<JoinHandle<()>>>,
}

impl RetryScheduler {
    pub fn new(
        adapter: Arc<dyn TransportAdapter>,
        policies: Arc<RetryPolicySet>,
        dead_letters: Arc<DeadLetterRouter>,
        metrics: Arc<EngineMetrics>,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            adapter,
            policies,
            dead_letters,
            metrics,
            shutdown,
            in_flight: Mutex::new(Vec::new()),
        }
    }

    pub fn policies(&self) -> &RetryPolicySet {
        &self.policies
    }

    /// Handle a `Retry` outcome: either schedule a backed-off redelivery
    /// or, when the attempt budget is spent, quarantine the message.
    pub async fn handle_retry(
        &self,
        envelope: MessageEnvelope,
        last_error: &str,
    ) -> Result<RetryDisposition> {
        let policy = self.policies.policy_for(&envelope.subject);

        if envelope.attempt.saturating_add(1) >= policy.max_attempts {
            error!(
                subject = %envelope.subject,
                message_id = %envelope.id,
                attempts = envelope.attempt.saturating_add(1),
                max_attempts = policy.max_attempts,
                "🔴 Retry budget exhausted, dead-lettering message"
            );
            let entry_id = self
                .dead_letters
                .quarantine(
                    envelope,
                    "retry budget exhausted",
                    Some(last_error.to_string()),
                )
                .await?;
            return Ok(RetryDisposition::DeadLettered { entry_id });
        }

        let delay = policy.jittered_delay(envelope.attempt);
        let next = envelope.with_incremented_attempt();
        info!(
            subject = %next.subject,
            message_id = %next.id,
            attempt = next.attempt,
            delay_ms = delay.as_millis() as u64,
            error = %last_error,
            "🔁 Scheduling redelivery with backoff"
        );
        self.metrics.record_retry_scheduled();

        let adapter = Arc::clone(&self.adapter);
        let dead_letters = Arc::clone(&self.dead_letters);
        let mut shutdown = self.shutdown.subscribe();
        let subject = next.subject.clone();
        let attempt = next.attempt;
        let handle = tokio::spawn(async move {
            // On shutdown, flush immediately instead of waiting out the
            // backoff against a closing adapter.
            let published = tokio::select! {
                result = adapter.publish_delayed(&subject, &next, delay) => result,
                _ = shutdown.recv() => adapter.publish(&subject, &next).await,
            };
            if let Err(err) = published {
                error!(
                    subject = %subject,
                    message_id = %next.id,
                    error = %err,
                    "Failed to republish message for retry, quarantining"
                );
                // Keep the failure durable: a lost republish still leaves a
                // dead letter entry instead of vanishing.
                if let Err(err) = dead_letters
                    .quarantine(next, "redelivery publish failed", Some(err.to_string()))
                    .await
                {
                    error!(error = %err, "Failed to record undeliverable retry");
                }
            }
        });
        let mut in_flight = self.in_flight.lock();
        in_flight.retain(|task| !task.is_finished());
        in_flight.push(handle);

        Ok(RetryDisposition::Scheduled { attempt, delay })
    }

    /// Await every scheduled republish. Called during engine shutdown
    /// after the shutdown signal fires, so pending backoffs resolve
    /// immediately via the flush path.
    pub async fn drain(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.in_flight.lock());
        for result in futures::future::join_all(handles).await {
            if let Err(err) = result {
                error!(error = %err, "Retry republish task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base_ms: u64, max_ms: u64, multiplier: f64, jitter: f64) -> RetryPolicy {
        RetryPolicy {
            subject_pattern: ">".to_string(),
            base_delay_ms: base_ms,
            max_delay_ms: max_ms,
            multiplier,
            max_attempts: 5,
            jitter_fraction: jitter,
        }
    }

    #[test]
    fn test_backoff_monotonic_and_capped() {
        let policy = policy(100, 5_000, 2.0, 0.0);
        let mut previous = Duration::ZERO;
        for attempt in 0..12 {
            let delay = policy.backoff_delay(attempt);
            assert!(delay >= previous, "delay must not decrease with attempt");
            assert!(delay <= policy.max_delay());
            assert!(delay >= policy.base_delay());
            previous = delay;
        }
        assert_eq!(policy.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_delay(10), Duration::from_millis(5_000));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = policy(100, 5_000, 2.0, 0.25);
        for attempt in 0..10 {
            for _ in 0..50 {
                let delay = policy.jittered_delay(attempt);
                assert!(delay >= policy.base_delay());
                assert!(delay <= policy.max_delay());
            }
        }
    }

    #[test]
    fn test_subject_pattern_matching() {
        assert!(subject_matches("orders.created", "orders.created"));
        assert!(!subject_matches("orders.created", "orders.cancelled"));
        assert!(subject_matches("orders.*", "orders.created"));
        assert!(!subject_matches("orders.*", "orders.created.v2"));
        assert!(subject_matches("orders.>", "orders.created.v2"));
        assert!(subject_matches(">", "anything.at.all"));
        assert!(!subject_matches("orders.>", "orders"));
    }

    #[test]
    fn test_first_match_wins() {
        let specific = RetryPolicy {
            subject_pattern: "payments.*".to_string(),
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        let broad = RetryPolicy {
            subject_pattern: ">".to_string(),
            max_attempts: 7,
            ..RetryPolicy::default()
        };
        let set = RetryPolicySet::new(vec![specific, broad]);

        assert_eq!(set.policy_for("payments.charge").max_attempts, 3);
        assert_eq!(set.policy_for("orders.created").max_attempts, 7);
    }

    #[test]
    fn test_max_configured_delay() {
        let set = RetryPolicySet::new(vec![
            policy(10, 1_000, 2.0, 0.0),
            policy(10, 60_000, 2.0, 0.0),
        ]);
        assert_eq!(set.max_configured_delay(), Duration::from_millis(60_000));
    }

    fn scheduler_with(
        adapter: Arc<crate::transport::InMemoryAdapter>,
        policies: Vec<RetryPolicy>,
    ) -> (Arc<DeadLetterRouter>, RetryScheduler) {
        let metrics = Arc::new(EngineMetrics::new());
        let dead_letters = Arc::new(DeadLetterRouter::new(adapter.clone(), Arc::clone(&metrics)));
        let (shutdown, _) = broadcast::channel(4);
        let scheduler = RetryScheduler::new(
            adapter,
            Arc::new(RetryPolicySet::new(policies)),
            Arc::clone(&dead_letters),
            metrics,
            shutdown,
        );
        (dead_letters, scheduler)
    }

    #[tokio::test]
    async fn test_attempt_counter_saturates_at_max() {
        let adapter = Arc::new(crate::transport::InMemoryAdapter::new());
        let (dead_letters, scheduler) = scheduler_with(adapter, vec![]);

        let mut envelope = MessageEnvelope::new("orders.created", vec![]);
        envelope.attempt = u32::MAX;

        let disposition = scheduler.handle_retry(envelope, "boom").await.unwrap();
        assert!(matches!(disposition, RetryDisposition::DeadLettered { .. }));
        assert_eq!(dead_letters.entries()[0].attempts_exhausted, u32::MAX);
    }

    #[tokio::test]
    async fn test_failed_republish_is_quarantined_not_dropped() {
        let adapter = Arc::new(crate::transport::InMemoryAdapter::new());
        let (dead_letters, scheduler) = scheduler_with(
            adapter.clone(),
            vec![RetryPolicy {
                base_delay_ms: 5,
                max_delay_ms: 10,
                jitter_fraction: 0.0,
                ..RetryPolicy::default()
            }],
        );
        adapter.close(Duration::ZERO).await.unwrap();

        let envelope = MessageEnvelope::new("orders.created", vec![]);
        let disposition = scheduler.handle_retry(envelope, "transient").await.unwrap();
        assert!(matches!(disposition, RetryDisposition::Scheduled { .. }));

        scheduler.drain().await;
        let entries = dead_letters.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].failure_reason, "redelivery publish failed");
    }
}
