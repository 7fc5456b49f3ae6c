//! Integration tests for configuration validation

#![allow(clippy::expect_used)]

use arena_protocol::config::{NetworkConfig, RateLimitConfig, MAX_PACKET_SIZE};
use arena_protocol::error::ProtocolError;
use arena_protocol::protocol::message::PacketType;
use std::time::Duration;
use tracing::Level;

#[test]
fn test_default_config_validates() {
    let config = NetworkConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_invalid_server_address() {
    let mut config = NetworkConfig::default();
    config.server.address = "invalid_address".to_string();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid server address")));
}

#[test]
fn test_empty_client_address() {
    let mut config = NetworkConfig::default();
    config.client.address = String::new();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("cannot be empty")));
}

#[test]
fn test_zero_backpressure_limit() {
    let mut config = NetworkConfig::default();
    config.server.backpressure_limit = 0;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Backpressure limit must be greater than 0")));
}

#[test]
fn test_zero_max_connections() {
    let mut config = NetworkConfig::default();
    config.server.max_connections = 0;

    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Max connections must be greater than 0")));
}

#[test]
fn test_sweep_interval_cannot_exceed_expiry() {
    let mut config = NetworkConfig::default();
    config.server.session_expiry = Duration::from_secs(120);
    config.server.session_sweep_interval = Duration::from_secs(600);

    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("cannot exceed session expiry")));
}

#[test]
fn test_idle_timeout_must_cover_two_heartbeats() {
    let mut config = NetworkConfig::default();
    config.client.heartbeat_interval = Duration::from_secs(10);
    config.client.idle_timeout = Duration::from_secs(15);

    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("two heartbeat intervals")));
}

#[test]
fn test_reconnect_needs_attempts() {
    let mut config = NetworkConfig::default();
    config.client.max_reconnect_attempts = 0;
    assert!(!config.validate().is_empty());

    config.client.auto_reconnect = false;
    assert!(config.validate().is_empty());
}

#[test]
fn test_packet_size_must_fit_header() {
    let mut config = NetworkConfig::default();
    config.protocol.max_packet_size = 512;
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Max packet size too small")));

    config.protocol.max_packet_size = MAX_PACKET_SIZE;
    config.protocol.compression_threshold_bytes = MAX_PACKET_SIZE + 1;
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Compression threshold")));
}

#[test]
fn test_unknown_rate_limit_type_rejected() {
    let mut config = NetworkConfig::default();
    config.rate_limit.limits.insert("Teleport".to_string(), 3);
    config.rate_limit.limits.insert("ChatMessage".to_string(), 0);

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("'Teleport'")));
    assert!(errors.iter().any(|e| e.contains("ChatMessage must be greater than 0")));
}

#[test]
fn test_rate_limit_lookup() {
    let limits = RateLimitConfig::default().with_limit(PacketType::Heartbeat, 3);
    assert_eq!(limits.limit_for(PacketType::Heartbeat), 3);
    assert_eq!(limits.limit_for(PacketType::LoginRequest), 5);
    assert_eq!(limits.limit_for(PacketType::LogoutRequest), limits.default_limit);
}

#[test]
fn test_logging_needs_an_output() {
    let mut config = NetworkConfig::default();
    config.logging.log_to_console = false;
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("At least one logging output")));

    config.logging.log_to_file = true;
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("log_file_path must be specified")));
}

#[test]
fn test_validate_strict_collects_errors() {
    let mut config = NetworkConfig::default();
    config.server.address = String::new();
    config.server.max_connections = 0;

    match config.validate_strict() {
        Err(ProtocolError::ConfigError(message)) => {
            assert!(message.contains("Server address cannot be empty"));
            assert!(message.contains("Max connections"));
        }
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn test_toml_overrides_sections() {
    let content = r#"
        [rate_limit]
        window = 1000
        default_limit = 30

        [rate_limit.limits]
        LoginRequest = 2

        [logging]
        app_name = "arena-test"
        log_level = "debug"
        log_to_console = true
        log_to_file = false
        json_format = true
    "#;

    let config = NetworkConfig::from_toml(content).expect("parse");
    assert_eq!(config.rate_limit.window, Duration::from_secs(1));
    assert_eq!(config.rate_limit.limit_for(PacketType::LoginRequest), 2);
    assert_eq!(config.rate_limit.limit_for(PacketType::Heartbeat), 30);
    assert_eq!(config.logging.log_level, Level::DEBUG);
    assert!(config.logging.json_format);
    assert_eq!(config.server.address, NetworkConfig::default().server.address);
}

#[test]
fn test_invalid_toml_is_config_error() {
    let result = NetworkConfig::from_toml("[server\naddress = ");
    assert!(matches!(result, Err(ProtocolError::ConfigError(_))));
}

#[test]
fn test_example_config_roundtrips() {
    let example = NetworkConfig::example_config();
    let parsed = NetworkConfig::from_toml(&example).expect("example parses");
    assert!(parsed.validate().is_empty());
}
