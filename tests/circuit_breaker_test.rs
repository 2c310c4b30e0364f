//! Circuit breaker behavior through the engine registry: trip on
//! consecutive failures, fail fast while open, recover through a probe.

use courier_core::resilience::{CircuitBreakerError, CircuitState};
use courier_core::{Courier, CourierConfig, InMemoryAdapter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn quick_trip_config() -> CourierConfig {
    let mut config = CourierConfig::default();
    config.circuit_breaker.failure_threshold = 2;
    config.circuit_breaker.open_duration_ms = 50;
    config.circuit_breaker.probe_timeout_ms = 1_000;
    config
}

#[tokio::test]
async fn test_trip_fail_fast_and_probe_recovery() {
    let engine = Courier::new(Arc::new(InMemoryAdapter::new()), quick_trip_config()).unwrap();
    let breaker = engine.breaker("payment_gateway");

    for _ in 0..2 {
        let result = breaker
            .call(|| async { Err::<(), &str>("gateway 502") })
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::OperationFailed(_))));
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    // Open circuit sheds load without invoking the guarded call
    let invoked = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&invoked);
    let result = breaker
        .call(move || {
            flag.store(true, Ordering::SeqCst);
            async { Ok::<(), &str>(()) }
        })
        .await;
    assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen { .. })));
    assert!(!invoked.load(Ordering::SeqCst));

    // After the open window one probe runs; its success closes the circuit
    tokio::time::sleep(Duration::from_millis(60)).await;
    let result = breaker.call(|| async { Ok::<(), &str>(()) }).await;
    assert!(result.is_ok());
    assert_eq!(breaker.state(), CircuitState::Closed);

    // Healthy calls flow again
    let result = breaker.call(|| async { Ok::<u32, &str>(7) }).await;
    assert_eq!(result.unwrap(), 7);
    assert!(engine.metrics().circuit_transitions >= 2);
}

#[tokio::test]
async fn test_breakers_shared_per_resource_across_callers() {
    let engine = Courier::new(Arc::new(InMemoryAdapter::new()), quick_trip_config()).unwrap();

    // One caller trips the gateway breaker
    let first = engine.breaker("payment_gateway");
    for _ in 0..2 {
        let _ = first.call(|| async { Err::<(), &str>("down") }).await;
    }

    // Every other caller keyed on the same resource observes Open
    let second = engine.breaker("payment_gateway");
    assert_eq!(second.state(), CircuitState::Open);

    // An unrelated resource is unaffected
    assert_eq!(engine.breaker("inventory_service").state(), CircuitState::Closed);
}
