//! Reply convention between saga commands and the services handling them.
//!
//! A command envelope carries `replyTo` and `correlationId` attributes;
//! the service publishes a [`SagaReply`] payload to `replyTo` with the
//! `correlationId` copied over so the orchestrator can route it to the
//! awaiting step.

use crate::error::{CourierError, Result};
use crate::messaging::envelope::MessageEnvelope;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const ATTR_CORRELATION_ID: &str = "correlationId";
pub const ATTR_REPLY_TO: &str = "replyTo";
pub const ATTR_SAGA_ID: &str = "sagaId";
pub const ATTR_SAGA_STEP: &str = "sagaStep";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaReplyStatus {
    Completed,
    Failed,
}

/// Wire payload of a saga step reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaReply {
    pub status: SagaReplyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub output: HashMap<String, String>,
}

impl SagaReply {
    pub fn completed(output: HashMap<String, String>) -> Self {
        Self {
            status: SagaReplyStatus::Completed,
            error: None,
            output,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: SagaReplyStatus::Failed,
            error: Some(error.into()),
            output: HashMap::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == SagaReplyStatus::Completed
    }

    /// Build the reply envelope for a received command, copying the
    /// correlation id and targeting the command's `replyTo` subject.
    /// Service handlers use this when answering saga commands.
    pub fn into_envelope(self, command: &MessageEnvelope) -> Result<MessageEnvelope> {
        let reply_to = command.attribute(ATTR_REPLY_TO).ok_or_else(|| {
            CourierError::internal("saga command envelope missing replyTo attribute")
        })?;
        let correlation_id = command.attribute(ATTR_CORRELATION_ID).ok_or_else(|| {
            CourierError::internal("saga command envelope missing correlationId attribute")
        })?;
        let payload = serde_json::to_vec(&self)?;
        Ok(MessageEnvelope::new(reply_to, payload)
            .with_attribute(ATTR_CORRELATION_ID, correlation_id))
    }

    pub fn from_envelope(envelope: &MessageEnvelope) -> Result<Self> {
        Ok(serde_json::from_slice(&envelope.payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_envelope_round_trip() {
        let command = MessageEnvelope::new("inventory.reserve", vec![])
            .with_attribute(ATTR_REPLY_TO, "inventory.reserve.reply")
            .with_attribute(ATTR_CORRELATION_ID, "saga:s1:0:forward");

        let reply = SagaReply::completed(HashMap::from([("reservation".into(), "r-9".into())]));
        let envelope = reply.clone().into_envelope(&command).unwrap();

        assert_eq!(envelope.subject, "inventory.reserve.reply");
        assert_eq!(
            envelope.attribute(ATTR_CORRELATION_ID),
            Some("saga:s1:0:forward")
        );
        assert_eq!(SagaReply::from_envelope(&envelope).unwrap(), reply);
    }

    #[test]
    fn test_reply_requires_routing_attributes() {
        let bare = MessageEnvelope::new("inventory.reserve", vec![]);
        assert!(SagaReply::completed(HashMap::new())
            .into_envelope(&bare)
            .is_err());
    }
}
