#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

//! # Courier Core
//!
//! Transport-agnostic reliable messaging and saga orchestration engine.
//!
//! ## Overview
//!
//! Courier moves opaque message envelopes between producers and consumers
//! with at-least-once delivery, idempotent duplicate suppression, bounded
//! exponential retry with jitter, dead-letter quarantine, circuit-breaker
//! protection for downstream calls, and saga orchestration with
//! reverse-order compensation. The broker behind it is an adapter; the
//! engine itself never sees a wire protocol.
//!
//! ## Architecture
//!
//! A published envelope flows through one linear pipeline on the consumer
//! side: subscription worker → delivery tracker (idempotency check) →
//! handler invocation (time-bounded) → outcome classification. `Ack`
//! completes the delivery, `Retry` routes through the retry scheduler
//! (and eventually the dead letter router once the attempt budget is
//! spent), `Nack` quarantines immediately. Sagas sit on top of the same
//! pipeline: every saga command and reply is an ordinary tracked message.
//!
//! ## Module Organization
//!
//! - [`messaging`] - Envelope model and wire codecs
//! - [`transport`] - Adapter contract plus the in-memory reference adapter
//! - [`delivery`] - Idempotency tracking and duplicate suppression
//! - [`retry`] - Backoff policies and redelivery scheduling
//! - [`dead_letter`] - Quarantine and operator replay
//! - [`resilience`] - Circuit breakers keyed by downstream resource
//! - [`consumer`] - Subscription worker loop
//! - [`saga`] - Definitions, instance state machine, orchestrator
//! - [`config`] - YAML configuration with validation
//! - [`engine`] - The [`Courier`] dependency-injection root
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging initialization
//! - [`metrics`] - Engine counters
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use courier_core::config::CourierConfig;
//! use courier_core::engine::Courier;
//! use courier_core::messaging::envelope::MessageEnvelope;
//! use courier_core::transport::{FnHandler, HandlerOutcome, InMemoryAdapter};
//! use std::sync::Arc;
//!
//! # async fn example() -> courier_core::Result<()> {
//! let engine = Courier::new(Arc::new(InMemoryAdapter::new()), CourierConfig::default())?;
//!
//! engine
//!     .subscribe(
//!         "orders.created",
//!         Arc::new(FnHandler(|envelope: MessageEnvelope| async move {
//!             println!("order: {}", envelope.subject);
//!             HandlerOutcome::Ack
//!         })),
//!     )
//!     .await?;
//!
//! engine
//!     .publish(&MessageEnvelope::json("orders.created", &serde_json::json!({"id": 1})))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod consumer;
pub mod dead_letter;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod metrics;
pub mod resilience;
pub mod retry;
pub mod saga;
pub mod transport;

pub use config::CourierConfig;
pub use engine::Courier;
pub use error::{CourierError, Result};
pub use messaging::envelope::MessageEnvelope;
pub use transport::{FnHandler, HandlerOutcome, InMemoryAdapter, MessageHandler, TransportAdapter};
