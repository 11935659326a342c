/// Integration tests for device configuration loading
use std::io::Write;
use tsmf_core::{DeviceConfig, DeviceError};

#[test]
fn test_load_from_file_and_environment() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("create temp config");
    writeln!(
        file,
        r#"
backend = "loopback"
client_name = "rdp-client"
target_length_ms = 100
max_length_ms = 400
operation_timeout_ms = 1500
"#
    )
    .unwrap();

    // File values only
    let config = DeviceConfig::load(Some(file.path())).expect("load config");
    assert_eq!(config.client_name, "rdp-client");
    assert_eq!(config.target_length_ms, 100);
    assert_eq!(config.max_length_ms, 400);
    assert_eq!(config.operation_timeout_ms, Some(1500));
    // Untouched fields keep their defaults
    assert_eq!(config.stream_name, "tsmf playback");
    assert_eq!(config.connect_timeout_ms, Some(5_000));
    assert!(!config.narrow_bit_depth);

    // Environment overrides the file
    std::env::set_var("TSMF_AUDIO_NARROW_BIT_DEPTH", "true");
    std::env::set_var("TSMF_AUDIO_TARGET_LENGTH_MS", "200");
    let config = DeviceConfig::load(Some(file.path())).expect("load config with env");
    std::env::remove_var("TSMF_AUDIO_NARROW_BIT_DEPTH");
    std::env::remove_var("TSMF_AUDIO_TARGET_LENGTH_MS");

    assert!(config.narrow_bit_depth);
    assert_eq!(config.target_length_ms, 200);
    assert_eq!(config.client_name, "rdp-client");
}

#[test]
fn test_invalid_file_is_rejected() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("create temp config");
    writeln!(file, "client_name = \"\"").unwrap();

    let result = DeviceConfig::load(Some(file.path()));
    assert!(matches!(result, Err(DeviceError::Config(_))));
}

#[test]
fn test_missing_file_is_an_error() {
    let result = DeviceConfig::load(Some(std::path::Path::new(
        "/nonexistent/tsmf-audio/device.toml",
    )));
    assert!(matches!(result, Err(DeviceError::Config(_))));
}

#[test]
fn test_timeouts_can_be_disabled_in_file() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("create temp config");
    writeln!(
        file,
        r#"
connect_timeout_ms = "none"
operation_timeout_ms = "250"
"#
    )
    .unwrap();

    let config = DeviceConfig::load(Some(file.path())).expect("load config");
    assert_eq!(config.connect_timeout_ms, None);
    assert_eq!(config.connect_timeout(), None);
    assert_eq!(config.operation_timeout_ms, Some(250));
}

#[test]
fn test_zero_timeout_in_file_is_rejected() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("create temp config");
    writeln!(file, "connect_timeout_ms = 0").unwrap();

    let result = DeviceConfig::load(Some(file.path()));
    assert!(matches!(result, Err(DeviceError::Config(_))));
}

#[test]
fn test_malformed_timeout_is_rejected() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("create temp config");
    writeln!(file, "operation_timeout_ms = \"soon\"").unwrap();

    let result = DeviceConfig::load(Some(file.path()));
    assert!(matches!(result, Err(DeviceError::Config(_))));
}
