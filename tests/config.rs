//! Configuration Module Tests
//!
//! Tests for EngineConfig layering: defaults, configuration files and `BATCH_*`
//! environment overrides.

use std::io::Write;
use std::path::Path;

use batch_core::error::BatchError;
use batch_core::EngineConfig;

fn config_file(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn config_has_expected_defaults() {
    let config = EngineConfig::default();

    assert_eq!(config.chunk.size, 10);
    assert_eq!(config.chunk.throttle_limit, 4);
    assert_eq!(config.fault_tolerance.retry_limit, 0);
    assert_eq!(config.step.start_limit, u32::MAX);
    assert!(!config.logging.json);
}

#[test]
fn config_file_overrides_defaults() {
    let file = config_file(
        ".toml",
        r#"
[chunk]
size = 25

[fault_tolerance]
retry_limit = 3

[logging]
level = "debug"
json = true
"#,
    );

    let config = EngineConfig::load(Some(file.path())).expect("config should load");

    assert_eq!(config.chunk.size, 25);
    assert_eq!(config.chunk.throttle_limit, 4);
    assert_eq!(config.fault_tolerance.retry_limit, 3);
    assert_eq!(config.logging.level, "debug");
    assert!(config.logging.json);
}

#[test]
fn config_file_in_json_format() {
    let file = config_file(".json", r#"{ "step": { "start_limit": 2, "allow_start_if_complete": true } }"#);

    let config = EngineConfig::load(Some(file.path())).expect("config should load");

    assert_eq!(config.step.start_limit, 2);
    assert!(config.step.allow_start_if_complete);
    assert_eq!(config.chunk.size, 10);
}

#[test]
fn missing_config_file_is_an_error() {
    let result = EngineConfig::load(Some(Path::new("/definitely/not/here/batch.toml")));
    assert!(matches!(result, Err(BatchError::Configuration(_))));
}

#[test]
fn invalid_values_are_rejected_after_layering() {
    let file = config_file(".toml", "[chunk]\nthrottle_limit = 0\n");
    let result = EngineConfig::load(Some(file.path()));
    assert!(matches!(result, Err(BatchError::Configuration(_))));
}

#[test]
fn environment_overrides_file() {
    // Only this test touches the skip limit, so parallel tests never observe it
    std::env::set_var("BATCH_FAULT_TOLERANCE__SKIP_LIMIT", "3");
    let file = config_file(".toml", "[fault_tolerance]\nskip_limit = 50\n");

    let from_file = EngineConfig::load(Some(file.path()));
    let from_env = EngineConfig::from_env();
    std::env::remove_var("BATCH_FAULT_TOLERANCE__SKIP_LIMIT");

    assert_eq!(from_file.expect("config should load").fault_tolerance.skip_limit, 3);
    assert_eq!(from_env.expect("config should load").fault_tolerance.skip_limit, 3);
}
