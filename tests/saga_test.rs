//! Saga orchestration end to end: forward execution over the messaging
//! pipeline, reverse-order compensation on failure, and interaction with
//! message-level retry and dead-lettering.

mod common;

use common::wait_for;
use courier_core::retry::RetryPolicy;
use courier_core::saga::{SagaDefinition, SagaReply, SagaState, SagaStepDefinition};
use courier_core::transport::{MessageHandler, TransportAdapter};
use courier_core::{
    Courier, CourierConfig, FnHandler, HandlerOutcome, InMemoryAdapter, MessageEnvelope,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn step(name: &str, prefix: &str, timeout_ms: u64) -> SagaStepDefinition {
    SagaStepDefinition {
        name: name.to_string(),
        forward_subject: format!("{prefix}.execute"),
        reply_subject: format!("{prefix}.reply"),
        compensating_subject: format!("{prefix}.compensate"),
        timeout_ms,
    }
}

/// Service handler that answers every saga command with a fixed reply,
/// optionally recording its label for ordering assertions
fn replying(
    adapter: Arc<InMemoryAdapter>,
    reply: SagaReply,
    record: Option<(Arc<Mutex<Vec<String>>>, String)>,
) -> Arc<dyn MessageHandler> {
    Arc::new(FnHandler(move |command: MessageEnvelope| {
        let adapter = Arc::clone(&adapter);
        let reply = reply.clone();
        let record = record.clone();
        async move {
            if let Some((log, label)) = record {
                log.lock().push(label);
            }
            let envelope = reply.into_envelope(&command).unwrap();
            adapter.publish(&envelope.subject, &envelope).await.unwrap();
            HandlerOutcome::Ack
        }
    }))
}

#[tokio::test]
async fn test_saga_completes_and_merges_step_outputs() {
    let adapter = Arc::new(InMemoryAdapter::new());
    let mut config = CourierConfig::default();
    config.sagas = vec![SagaDefinition {
        name: "fulfillment".to_string(),
        steps: vec![step("Reserve", "inventory", 2_000), step("Charge", "payments", 2_000)],
    }];
    let engine = Courier::new(adapter.clone(), config).unwrap();

    engine
        .subscribe(
            "inventory.execute",
            replying(
                adapter.clone(),
                SagaReply::completed(HashMap::from([("reservationId".into(), "r-77".into())])),
                None,
            ),
        )
        .await
        .unwrap();
    engine
        .subscribe(
            "payments.execute",
            replying(
                adapter.clone(),
                SagaReply::completed(HashMap::from([("chargeId".into(), "c-12".into())])),
                None,
            ),
        )
        .await
        .unwrap();

    let instance = engine
        .start_saga(
            "fulfillment",
            HashMap::from([("orderId".into(), "o-1".into())]),
        )
        .await
        .unwrap();

    assert_eq!(instance.state, SagaState::Completed);
    assert_eq!(instance.completed_steps.len(), 2);
    assert_eq!(instance.context.get("orderId").map(String::as_str), Some("o-1"));
    assert_eq!(instance.context.get("reservationId").map(String::as_str), Some("r-77"));
    assert_eq!(instance.context.get("chargeId").map(String::as_str), Some("c-12"));
    assert_eq!(engine.metrics().sagas_completed, 1);
    engine.shutdown(Duration::from_millis(500)).await.unwrap();
}

#[tokio::test]
async fn test_failed_step_compensates_completed_steps_in_reverse_order() {
    let adapter = Arc::new(InMemoryAdapter::new());
    let mut config = CourierConfig::default();
    config.sagas = vec![SagaDefinition {
        name: "fulfillment".to_string(),
        steps: vec![
            step("Reserve", "inventory", 2_000),
            step("Charge", "payments", 2_000),
            step("Ship", "shipping", 2_000),
        ],
    }];
    let engine = Courier::new(adapter.clone(), config).unwrap();

    let compensations: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let ok = |output: &[(&str, &str)]| {
        SagaReply::completed(
            output
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    };

    engine
        .subscribe("inventory.execute", replying(adapter.clone(), ok(&[]), None))
        .await
        .unwrap();
    engine
        .subscribe("payments.execute", replying(adapter.clone(), ok(&[]), None))
        .await
        .unwrap();
    engine
        .subscribe(
            "shipping.execute",
            replying(adapter.clone(), SagaReply::failed("no carrier capacity"), None),
        )
        .await
        .unwrap();
    engine
        .subscribe(
            "payments.compensate",
            replying(
                adapter.clone(),
                ok(&[]),
                Some((Arc::clone(&compensations), "Charge".to_string())),
            ),
        )
        .await
        .unwrap();
    engine
        .subscribe(
            "inventory.compensate",
            replying(
                adapter.clone(),
                ok(&[]),
                Some((Arc::clone(&compensations), "Reserve".to_string())),
            ),
        )
        .await
        .unwrap();

    let instance = engine.start_saga("fulfillment", HashMap::new()).await.unwrap();

    assert_eq!(instance.state, SagaState::Failed);
    let completed: Vec<&str> = instance
        .completed_steps
        .iter()
        .map(|s| s.step_name.as_str())
        .collect();
    assert_eq!(completed, vec!["Reserve", "Charge"]);
    // Reverse order of completion
    assert_eq!(*compensations.lock(), vec!["Charge".to_string(), "Reserve".to_string()]);
    assert_eq!(engine.metrics().sagas_failed, 1);
    assert_eq!(engine.metrics().compensations_run, 2);
    engine.shutdown(Duration::from_millis(500)).await.unwrap();
}

/// The order-processing scenario: the charge service exhausts its retry
/// budget and never replies, so the step times out, the charge command
/// lands in the dead letter queue, and the reservation is compensated.
#[tokio::test]
async fn test_saga_step_retry_exhaustion_dead_letters_and_compensates() {
    let adapter = Arc::new(InMemoryAdapter::new());
    let mut config = CourierConfig::default();
    config.retry_policies = vec![RetryPolicy {
        subject_pattern: "payments.>".to_string(),
        base_delay_ms: 20,
        max_delay_ms: 50,
        multiplier: 2.0,
        max_attempts: 3,
        jitter_fraction: 0.0,
    }];
    config.sagas = vec![SagaDefinition {
        name: "order".to_string(),
        steps: vec![
            SagaStepDefinition {
                name: "ReserveInventory".to_string(),
                forward_subject: "inventory.reserve".to_string(),
                reply_subject: "inventory.reserve.reply".to_string(),
                compensating_subject: "inventory.release".to_string(),
                timeout_ms: 2_000,
            },
            SagaStepDefinition {
                name: "ChargePayment".to_string(),
                forward_subject: "payments.charge".to_string(),
                reply_subject: "payments.charge.reply".to_string(),
                compensating_subject: "payments.refund".to_string(),
                timeout_ms: 500,
            },
            SagaStepDefinition {
                name: "ScheduleShipment".to_string(),
                forward_subject: "shipping.schedule".to_string(),
                reply_subject: "shipping.schedule.reply".to_string(),
                compensating_subject: "shipping.cancel".to_string(),
                timeout_ms: 2_000,
            },
        ],
    }];
    let engine = Courier::new(adapter.clone(), config).unwrap();

    let compensations: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let charge_attempts = Arc::new(AtomicU32::new(0));

    engine
        .subscribe(
            "inventory.reserve",
            replying(
                adapter.clone(),
                SagaReply::completed(HashMap::from([("reservationId".into(), "r-9".into())])),
                None,
            ),
        )
        .await
        .unwrap();
    let attempts = Arc::clone(&charge_attempts);
    engine
        .subscribe(
            "payments.charge",
            Arc::new(FnHandler(move |_command: MessageEnvelope| {
                let attempts = Arc::clone(&attempts);
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    HandlerOutcome::retry("card processor unavailable")
                }
            })),
        )
        .await
        .unwrap();
    engine
        .subscribe(
            "inventory.release",
            replying(
                adapter.clone(),
                SagaReply::completed(HashMap::new()),
                Some((Arc::clone(&compensations), "ReserveInventory".to_string())),
            ),
        )
        .await
        .unwrap();

    let instance = engine.start_saga("order", HashMap::new()).await.unwrap();

    assert_eq!(instance.state, SagaState::Failed);
    let completed: Vec<&str> = instance
        .completed_steps
        .iter()
        .map(|s| s.step_name.as_str())
        .collect();
    assert_eq!(completed, vec!["ReserveInventory"]);
    assert_eq!(*compensations.lock(), vec!["ReserveInventory".to_string()]);
    assert_eq!(instance.context.get("reservationId").map(String::as_str), Some("r-9"));

    wait_for("charge command dead-lettered", Duration::from_secs(3), || async {
        !engine.dead_letters().entries_for_subject("payments.charge").is_empty()
    })
    .await;
    assert_eq!(charge_attempts.load(Ordering::SeqCst), 3);
    engine.shutdown(Duration::from_millis(500)).await.unwrap();
}
