//! Configuration loading tests

use std::fs;
use std::time::Duration;

use aeroexec::config::{ConfigError, ExecConfig};
use aeroexec::exec::DEFAULT_SORT_MAX_BYTES;
use aeroexec::observability::{Logger, Severity};
use tempfile::TempDir;

// =============================================================================
// Loading
// =============================================================================

#[test]
fn test_load_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("exec.json");
    fs::write(
        &path,
        r#"{"sort_max_bytes": 1048576, "oplog_backwards_scan_time_ms": 250, "log_level": "trace"}"#,
    )
    .unwrap();

    let config = ExecConfig::load(&path).unwrap();
    assert_eq!(config.sort_max_bytes, 1024 * 1024);
    assert_eq!(config.oplog_backwards_scan_time(), Duration::from_millis(250));
    assert_eq!(config.yield_iterations, 128);
    assert_eq!(config.severity(), Severity::Trace);
}

#[test]
fn test_missing_file() {
    let dir = TempDir::new().unwrap();
    let err = ExecConfig::load(&dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
    assert_eq!(err.code(), "AERO_CONFIG_READ");
}

#[test]
fn test_malformed_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("exec.json");
    fs::write(&path, "{ sort_max_bytes: ").unwrap();
    assert_eq!(ExecConfig::load(&path).unwrap_err().code(), "AERO_CONFIG_PARSE");
}

#[test]
fn test_default_sort_limit_matches_stage_default() {
    assert_eq!(ExecConfig::default().sort_max_bytes, DEFAULT_SORT_MAX_BYTES);
}

// =============================================================================
// Validation
// =============================================================================

#[test]
fn test_rejects_invalid_values() {
    let err = ExecConfig::from_json_str(r#"{"sort_max_bytes": 0}"#).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { field: "sort_max_bytes", .. }));

    let err = ExecConfig::from_json_str(r#"{"log_level": "LOUD"}"#).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { field: "log_level", .. }));
    assert_eq!(err.code(), "AERO_CONFIG_INVALID");
}

#[test]
fn test_apply_logging_sets_threshold() {
    let config = ExecConfig::from_json_str(r#"{"log_level": "WARN"}"#).unwrap();
    config.apply_logging();
    assert_eq!(Logger::min_severity(), Severity::Warn);
    assert!(Logger::enabled(Severity::Error));
    assert!(!Logger::enabled(Severity::Info));

    ExecConfig::default().apply_logging();
    assert_eq!(Logger::min_severity(), Severity::Info);
}
