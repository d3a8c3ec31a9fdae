// SPDX-License-Identifier: MPL-2.0

//! Integration tests for configuration module

use kinect_session::{ConfigError, DepthCurve, Led, SessionConfig};
use std::path::PathBuf;

fn scratch_path(name: &str) -> PathBuf {
    std::env::temp_dir()
        .join(format!("kinect-session-test-{}", std::process::id()))
        .join(name)
}

#[test]
fn test_config_default() {
    let config = SessionConfig::default();
    assert_eq!(config.retry_delay_ms, 1000);
    assert_eq!(config.settle_delay_ms, 100);
    assert_eq!(config.callback_lock_attempts, 64);
    assert_eq!(config.depth_curve, DepthCurve::default());
}

#[test]
fn test_save_then_load() {
    let path = scratch_path("nested/config.json");
    let config = SessionConfig {
        device_index: 2,
        led: Led::BlinkGreen,
        depth_curve: DepthCurve::Linear,
        ..SessionConfig::default()
    };
    config.save(&path).unwrap();

    let loaded = SessionConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn test_load_missing_file_is_io_error() {
    let path = scratch_path("does-not-exist.json");
    assert!(matches!(SessionConfig::load(&path), Err(ConfigError::Io(_))));
}

#[test]
fn test_load_or_default_falls_back() {
    let path = scratch_path("broken.json");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "not json").unwrap();
    assert_eq!(
        SessionConfig::load_or_default(Some(&path)),
        SessionConfig::default()
    );

    let missing = scratch_path("missing.json");
    assert_eq!(
        SessionConfig::load_or_default(Some(&missing)),
        SessionConfig::default()
    );
    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_depth_curve_json_shape() {
    let json = serde_json::to_value(DepthCurve::Exponential {
        power: 2.0,
        multiply: 1.0,
    })
    .unwrap();
    assert_eq!(json["kind"], "exponential");
    assert_eq!(json["power"], 2.0);
}
