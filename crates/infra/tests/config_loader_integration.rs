//! Integration tests for configuration loader
//!
//! Tests loading complete configuration files from disk.

use std::io::Write;
use std::time::Duration;

use marketpulse_domain::{GuardConfig, MarketPulseError};
use marketpulse_infra::config;
use tempfile::Builder;

fn write_config(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
    let mut file = Builder::new().suffix(suffix).tempfile().expect("create temp config");
    file.write_all(contents.as_bytes()).expect("write temp config");
    file
}

#[test]
fn test_load_config_from_toml_file() {
    let file = write_config(
        ".toml",
        r#"
[logging]
level = "marketpulse=debug"
json = true

[store]
consistency_delay_ms = 250
update_max_retries = 7
record_ttl_secs = 86400

[fetch]
request_timeout_ms = 4000
market_base_url = "https://market.example.com/v1"

[guards.market]
max_requests = 5
window_ms = 1000
max_concurrent = 2
"#,
    );

    let config = config::load_from_file(Some(file.path().to_path_buf())).unwrap();

    assert_eq!(config.logging.level, "marketpulse=debug");
    assert!(config.logging.json);
    assert_eq!(config.store.consistency_delay(), Duration::from_millis(250));
    assert_eq!(config.store.update_max_retries, 7);
    assert_eq!(config.store.record_ttl(), Some(Duration::from_secs(86_400)));
    assert_eq!(config.fetch.request_timeout(), Duration::from_secs(4));
    assert_eq!(config.fetch.market_base_url.as_deref(), Some("https://market.example.com/v1"));
    assert_eq!(config.fetch.news_base_url, None);

    let market = config.guard("market");
    assert_eq!(market.max_requests, 5);
    assert_eq!(market.window(), Duration::from_secs(1));
    assert_eq!(market.max_concurrent, 2);
    assert_eq!(market.failure_threshold, GuardConfig::default().failure_threshold);
    assert_eq!(config.guard("news"), GuardConfig::default());
}

#[test]
fn test_load_config_from_json_file() {
    let file = write_config(
        ".json",
        r#"{
            "store": { "consistency_delay_ms": 0 },
            "fetch": { "news_base_url": "https://news.example.com" },
            "guards": { "news": { "failure_threshold": 2, "breaker_timeout_ms": 15000 } }
        }"#,
    );

    let config = config::load_from_file(Some(file.path().to_path_buf())).unwrap();

    assert_eq!(config.store.consistency_delay(), Duration::ZERO);
    assert_eq!(config.fetch.news_base_url.as_deref(), Some("https://news.example.com"));
    assert_eq!(config.guard("news").failure_threshold, 2);
    assert_eq!(config.guard("news").breaker_timeout(), Duration::from_secs(15));
}

#[test]
fn test_invalid_guard_is_rejected() {
    let file = write_config(
        ".toml",
        r#"
[guards.market]
success_threshold = 0
"#,
    );

    let err = config::load_from_file(Some(file.path().to_path_buf())).unwrap_err();
    assert_eq!(
        err,
        MarketPulseError::Config("guards.market.success_threshold must be greater than 0".into())
    );
}

#[test]
fn test_malformed_and_unsupported_files_are_rejected() {
    let broken = write_config(".json", "{ \"store\": ");
    let err = config::load_from_file(Some(broken.path().to_path_buf())).unwrap_err();
    assert!(matches!(
        err,
        MarketPulseError::Config(message) if message.starts_with("Invalid JSON format")
    ));

    let yaml = write_config(".yaml", "store: {}");
    let err = config::load_from_file(Some(yaml.path().to_path_buf())).unwrap_err();
    assert_eq!(err, MarketPulseError::Config("Unsupported config format: yaml".into()));
}
