//! # Courier Error Types
//!
//! Structured error handling for the messaging engine using thiserror
//! instead of `Box<dyn Error>` patterns. Handler-level failures are never
//! surfaced through this type; they are converted to the Ack/Nack/Retry
//! trichotomy at the handler boundary.

use std::time::Duration;
use thiserror::Error;

/// Errors produced by the messaging and saga engine
#[derive(Error, Debug)]
pub enum CourierError {
    #[error("Transport operation failed: {operation}: {message}")]
    Transport { operation: String, message: String },

    #[error("Envelope codec error ({codec}): {message}")]
    Codec { codec: String, message: String },

    #[error("Configuration error: {component}: {message}")]
    Configuration { component: String, message: String },

    #[error("Operation {operation} timed out after {timeout:?}")]
    Timeout { operation: String, timeout: Duration },

    #[error("Circuit breaker is open for resource: {resource}")]
    CircuitOpen { resource: String },

    #[error("Dead letter entry not found: {entry_id}")]
    DeadLetterNotFound { entry_id: String },

    #[error("Unknown saga definition: {definition}")]
    UnknownSagaDefinition { definition: String },

    #[error("Saga {saga_id} error: {message}")]
    Saga { saga_id: String, message: String },

    #[error("Adapter is closed")]
    AdapterClosed,

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl CourierError {
    /// Create a transport error
    pub fn transport(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a codec error
    pub fn codec(codec: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Codec {
            codec: codec.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout,
        }
    }

    /// Create a saga error
    pub fn saga(saga_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Saga {
            saga_id: saga_id.into(),
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Conversion from serde_json::Error for the JSON wire codec
impl From<serde_json::Error> for CourierError {
    fn from(err: serde_json::Error) -> Self {
        CourierError::codec("json", err.to_string())
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, CourierError>;
