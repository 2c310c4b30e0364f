//! # Dead Letter Router
//!
//! Isolates poison messages with diagnostic metadata on a dedicated
//! subject, separate from normal flow. Entries are never deleted
//! automatically; replay is an explicit operator action through
//! [`DeadLetterRouter::requeue`], the only operator-facing mutation in
//! the engine.

use crate::error::{CourierError, Result};
use crate::messaging::envelope::MessageEnvelope;
use crate::metrics::EngineMetrics;
use crate::transport::TransportAdapter;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Subject prefix for the quarantine queue mirroring the original subject
pub const DEAD_LETTER_SUBJECT_PREFIX: &str = "dlq";

/// Durable record of a quarantined message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub entry_id: String,
    pub envelope: MessageEnvelope,
    pub failure_reason: String,
    pub attempts_exhausted: u32,
    pub last_error: Option<String>,
    pub quarantined_at: DateTime<Utc>,
}

/// Quarantine store plus the publish path onto the dead letter subject
pub struct DeadLetterRouter {
    adapter: Arc<dyn TransportAdapter>,
    entries: DashMap<String, DeadLetterEntry>,
    metrics: Arc<EngineMetrics>,
}

impl DeadLetterRouter {
    pub fn new(adapter: Arc<dyn TransportAdapter>, metrics: Arc<EngineMetrics>) -> Self {
        Self {
            adapter,
            entries: DashMap::new(),
            metrics,
        }
    }

    /// Dead letter subject for an original subject
    pub fn dead_letter_subject(subject: &str) -> String {
        format!("{DEAD_LETTER_SUBJECT_PREFIX}.{subject}")
    }

    /// Quarantine a message: record the entry, publish it on the dead
    /// letter subject, and return the entry id. The caller acknowledges
    /// the original message afterwards so it leaves the live queue — the
    /// failure is now durably recorded, not lost.
    ///
    /// The entry is recorded before the dead letter publish is attempted;
    /// a failed publish leaves the entry intact (same as `requeue`), so a
    /// quarantined message is always inspectable and replayable.
    pub async fn quarantine(
        &self,
        envelope: MessageEnvelope,
        reason: &str,
        last_error: Option<String>,
    ) -> Result<String> {
        let entry = DeadLetterEntry {
            entry_id: Uuid::new_v4().to_string(),
            attempts_exhausted: envelope.attempt.saturating_add(1),
            failure_reason: reason.to_string(),
            last_error,
            quarantined_at: Utc::now(),
            envelope,
        };

        warn!(
            entry_id = %entry.entry_id,
            subject = %entry.envelope.subject,
            message_id = %entry.envelope.id,
            reason = %entry.failure_reason,
            attempts = entry.attempts_exhausted,
            "☠️ Message quarantined to dead letter queue"
        );

        let dlq_subject = Self::dead_letter_subject(&entry.envelope.subject);
        let dlq_payload = serde_json::to_vec(&entry)?;
        let dlq_envelope = MessageEnvelope::new(dlq_subject.clone(), dlq_payload)
            .with_attribute("entryId", entry.entry_id.clone())
            .with_attribute("originalSubject", entry.envelope.subject.clone());

        let entry_id = entry.entry_id.clone();
        self.entries.insert(entry_id.clone(), entry);
        self.metrics.record_dead_lettered();

        if let Err(err) = self.adapter.publish(&dlq_subject, &dlq_envelope).await {
            warn!(
                entry_id = %entry_id,
                subject = %dlq_subject,
                error = %err,
                "Dead letter publish failed; entry retained for requeue"
            );
        }
        Ok(entry_id)
    }

    /// Operator-initiated replay: republish the original envelope with its
    /// attempt counter reset to 0 and drop the entry.
    pub async fn requeue(&self, entry_id: &str) -> Result<()> {
        let (_, entry) =
            self.entries
                .remove(entry_id)
                .ok_or_else(|| CourierError::DeadLetterNotFound {
                    entry_id: entry_id.to_string(),
                })?;

        let replayed = entry.envelope.with_attempt_reset();
        info!(
            entry_id = %entry_id,
            subject = %replayed.subject,
            message_id = %replayed.id,
            "♻️ Requeueing dead letter entry"
        );
        match self.adapter.publish(&replayed.subject, &replayed).await {
            Ok(()) => Ok(()),
            Err(err) => {
                // Keep the entry durable if the replay publish failed
                self.entries.insert(entry.entry_id.clone(), entry);
                Err(err)
            }
        }
    }

    /// Inspect a single entry
    pub fn entry(&self, entry_id: &str) -> Option<DeadLetterEntry> {
        self.entries.get(entry_id).map(|e| e.clone())
    }

    /// Inspect all quarantined entries
    pub fn entries(&self) -> Vec<DeadLetterEntry> {
        self.entries.iter().map(|e| e.clone()).collect()
    }

    /// Entries quarantined from one original subject
    pub fn entries_for_subject(&self, subject: &str) -> Vec<DeadLetterEntry> {
        self.entries
            .iter()
            .filter(|e| e.envelope.subject == subject)
            .map(|e| e.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
