//! # Envelope Codecs
//!
//! Pluggable serialization for the message envelope. `JsonCodec` produces
//! the canonical wire shape; `BinaryCodec` is a compact bincode encoding
//! for transports where both ends run this engine.

use crate::error::{CourierError, Result};
use crate::messaging::envelope::MessageEnvelope;

/// Encode/decode boundary between envelopes and raw transport bytes
pub trait EnvelopeCodec: Send + Sync {
    fn encode(&self, envelope: &MessageEnvelope) -> Result<Vec<u8>>;
    fn decode(&self, raw: &[u8]) -> Result<MessageEnvelope>;
    fn name(&self) -> &'static str;
}

/// Canonical JSON wire codec (base64 payload field)
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl EnvelopeCodec for JsonCodec {
    fn encode(&self, envelope: &MessageEnvelope) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(envelope)?)
    }

    fn decode(&self, raw: &[u8]) -> Result<MessageEnvelope> {
        Ok(serde_json::from_slice(raw)?)
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

/// Compact binary codec for same-engine transports
#[derive(Debug, Default, Clone, Copy)]
pub struct BinaryCodec;

impl EnvelopeCodec for BinaryCodec {
    fn encode(&self, envelope: &MessageEnvelope) -> Result<Vec<u8>> {
        bincode::serialize(envelope).map_err(|e| CourierError::codec("binary", e.to_string()))
    }

    fn decode(&self, raw: &[u8]) -> Result<MessageEnvelope> {
        bincode::deserialize(raw).map_err(|e| CourierError::codec("binary", e.to_string()))
    }

    fn name(&self) -> &'static str {
        "binary"
    }
}
