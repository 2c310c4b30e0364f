//! # Message Envelope
//!
//! Defines the wire-independent message envelope carried over every
//! transport adapter. The canonical on-wire shape is a JSON object
//! `{id, subject, payload (base64), attributes, attempt, idempotencyKey,
//! producedAt}` regardless of broker; adapters with native headers may map
//! `attributes`/`attempt` to broker metadata to avoid double-encoding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Wire-independent message envelope.
///
/// Immutable once created: the only sanctioned mutations are the
/// attempt-counter constructors used by the retry scheduler and the dead
/// letter router. Transport adapters never touch `attempt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Globally unique, producer-assigned message id
    pub id: String,
    /// Routing key / topic
    pub subject: String,
    /// Opaque payload bytes (base64 in the JSON wire form)
    #[serde(with = "payload_encoding")]
    pub payload: Vec<u8>,
    /// String key/value metadata, insertion order irrelevant
    pub attributes: HashMap<String, String>,
    /// Delivery attempt counter, starts at 0, incremented only by the
    /// retry scheduler
    pub attempt: u32,
    /// Deduplication key, defaults to `id` when unset by the producer
    #[serde(rename = "idempotencyKey")]
    pub idempotency_key: String,
    /// Producer-side creation timestamp
    #[serde(rename = "producedAt")]
    pub produced_at: DateTime<Utc>,
}

impl MessageEnvelope {
    /// Create a new envelope with a generated id and default idempotency key
    pub fn new(subject: impl Into<String>, payload: Vec<u8>) -> Self {
        let id = Uuid::new_v4().to_string();
        Self {
            id: id.clone(),
            subject: subject.into(),
            payload,
            attributes: HashMap::new(),
            attempt: 0,
            idempotency_key: id,
            produced_at: Utc::now(),
        }
    }

    /// Create an envelope carrying a JSON payload
    pub fn json(subject: impl Into<String>, value: &serde_json::Value) -> Self {
        Self::new(subject, value.to_string().into_bytes())
    }

    /// Set an attribute (builder style)
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Override the idempotency key (builder style)
    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = key.into();
        self
    }

    /// Copy of this envelope with `attempt` incremented.
    ///
    /// Used exclusively by the retry scheduler when republishing; keeps
    /// the attempt counter monotonically non-decreasing for a given id.
    #[must_use]
    pub fn with_incremented_attempt(&self) -> Self {
        let mut next = self.clone();
        next.attempt = self.attempt.saturating_add(1);
        next
    }

    /// Copy of this envelope with `attempt` reset to 0.
    ///
    /// Used only by dead letter replay (`requeue`), which restarts the
    /// retry budget from scratch.
    #[must_use]
    pub fn with_attempt_reset(&self) -> Self {
        let mut next = self.clone();
        next.attempt = 0;
        next
    }

    /// Attribute lookup helper
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Parse the payload as JSON
    pub fn payload_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

/// Payload field encoding: base64 string in human-readable formats (the
/// canonical JSON wire shape), raw bytes in binary formats.
mod payload_encoding {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            STANDARD.encode(bytes).serialize(serializer)
        } else {
            serializer.serialize_bytes(bytes)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        if deserializer.is_human_readable() {
            let encoded = String::deserialize(deserializer)?;
            STANDARD
                .decode(encoded.as_bytes())
                .map_err(serde::de::Error::custom)
        } else {
            Vec::<u8>::deserialize(deserializer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_defaults() {
        let envelope = MessageEnvelope::new("orders.created", b"hello".to_vec());
        assert_eq!(envelope.subject, "orders.created");
        assert_eq!(envelope.attempt, 0);
        assert_eq!(envelope.idempotency_key, envelope.id);
        assert!(envelope.attributes.is_empty());
    }

    #[test]
    fn test_wire_shape_uses_base64_and_camel_case() {
        let envelope = MessageEnvelope::new("orders.created", b"\x00\x01binary".to_vec())
            .with_idempotency_key("order-1001");

        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json["payload"].is_string());
        assert_eq!(json["idempotencyKey"], "order-1001");
        assert!(json.get("producedAt").is_some());

        let decoded: MessageEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(decoded.payload, b"\x00\x01binary");
    }

    #[test]
    fn test_attempt_constructors() {
        let envelope = MessageEnvelope::new("orders.created", vec![]);
        let retried = envelope.with_incremented_attempt();
        assert_eq!(retried.attempt, 1);
        assert_eq!(retried.id, envelope.id);

        let replayed = retried.with_attempt_reset();
        assert_eq!(replayed.attempt, 0);
    }

    #[test]
    fn test_attribute_builder() {
        let envelope = MessageEnvelope::new("orders.created", vec![])
            .with_attribute("correlationId", "saga-1:0:forward");
        assert_eq!(envelope.attribute("correlationId"), Some("saga-1:0:forward"));
        assert_eq!(envelope.attribute("missing"), None);
    }
}
