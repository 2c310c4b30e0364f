//! Configuration loading from YAML files with environment overrides.

use anyhow::Result;
use courier_core::CourierConfig;
use std::io::Write;

const CONFIG_YAML: &str = r#"
consumer:
  max_concurrency: 4
delivery:
  ttl_ms: 120000
retry_policies:
  - subject_pattern: "payments.>"
    base_delay_ms: 200
    max_delay_ms: 10000
    multiplier: 2.0
    max_attempts: 3
    jitter_fraction: 0.1
sagas:
  - name: order
    steps:
      - name: ReserveInventory
        forward_subject: inventory.reserve
        reply_subject: inventory.reserve.reply
        compensating_subject: inventory.release
        timeout_ms: 5000
environments:
  production:
    consumer:
      max_concurrency: 32
"#;

#[test]
fn test_load_from_yaml_file() -> Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(CONFIG_YAML.as_bytes())?;

    // COURIER_ENV is unset in the test environment, so the development
    // defaults apply and the production override section is ignored
    let config = CourierConfig::load_from_path(file.path())?;
    assert_eq!(config.consumer.max_concurrency, 4);
    assert_eq!(config.delivery.ttl_ms, 120_000);
    assert_eq!(config.sagas.len(), 1);
    assert_eq!(config.sagas[0].steps[0].name, "ReserveInventory");
    assert_eq!(config.policy_set().policy_for("payments.charge").max_attempts, 3);
    Ok(())
}

#[test]
fn test_missing_file_is_a_configuration_error() {
    let result = CourierConfig::load_from_path("/nonexistent/courier.yaml");
    assert!(matches!(
        result,
        Err(courier_core::CourierError::Configuration { .. })
    ));
}
