//! End-to-end delivery pipeline: publish through the engine, process
//! through a subscription worker, and verify duplicate suppression.

mod common;

use common::wait_for;
use courier_core::{
    Courier, CourierConfig, FnHandler, HandlerOutcome, InMemoryAdapter, MessageEnvelope,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_duplicate_deliveries_processed_exactly_once() {
    let adapter = Arc::new(InMemoryAdapter::new());
    let engine = Courier::new(adapter.clone(), CourierConfig::default()).unwrap();

    let invocations = Arc::new(AtomicU32::new(0));
    let seen = Arc::clone(&invocations);
    engine
        .subscribe(
            "billing.invoice",
            Arc::new(FnHandler(move |_envelope: MessageEnvelope| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    HandlerOutcome::Ack
                }
            })),
        )
        .await
        .unwrap();

    let envelope = MessageEnvelope::new("billing.invoice", b"invoice-7".to_vec());
    engine.publish(&envelope).await.unwrap();
    wait_for("first processing", Duration::from_secs(2), || async {
        engine.metrics().messages_processed == 1
    })
    .await;

    // Broker redelivers the same message twice; side effects must not repeat
    adapter.inject_duplicate("billing.invoice", envelope.clone());
    adapter.inject_duplicate("billing.invoice", envelope.clone());
    wait_for("duplicate suppression", Duration::from_secs(2), || async {
        engine.metrics().duplicates_suppressed == 2
    })
    .await;

    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(engine.metrics().messages_processed, 1);
    engine.shutdown(Duration::from_millis(500)).await.unwrap();
}

#[tokio::test]
async fn test_distinct_messages_all_processed() {
    let adapter = Arc::new(InMemoryAdapter::new());
    let engine = Courier::new(adapter, CourierConfig::default()).unwrap();

    let invocations = Arc::new(AtomicU32::new(0));
    let seen = Arc::clone(&invocations);
    engine
        .subscribe(
            "billing.invoice",
            Arc::new(FnHandler(move |_envelope: MessageEnvelope| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    HandlerOutcome::Ack
                }
            })),
        )
        .await
        .unwrap();

    for n in 0..10 {
        engine
            .publish(&MessageEnvelope::new(
                "billing.invoice",
                format!("invoice-{n}").into_bytes(),
            ))
            .await
            .unwrap();
    }
    wait_for("all messages processed", Duration::from_secs(2), || async {
        engine.metrics().messages_processed == 10
    })
    .await;
    assert_eq!(invocations.load(Ordering::SeqCst), 10);
    engine.shutdown(Duration::from_millis(500)).await.unwrap();
}
