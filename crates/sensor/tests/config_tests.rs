//! Configuration file round trips

use protocol::{DeviceIdentity, TransferMode};
use sensor::{DetectorMode, SensorConfig};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_save_then_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("sensor.toml");

    let mut config = SensorConfig::default();
    config.host.tick_interval_ms = 250;
    config.device.signature = DeviceIdentity::new(0x1234, 0x0001);
    config.device.input_transfer = TransferMode::Control;
    config.detector.algorithm = DetectorMode::MotionDetection;
    config.detector.blink_interval = 40;

    config.save(&path).unwrap();
    assert!(path.exists());

    let (loaded, origin) = SensorConfig::load(Some(path.clone())).unwrap();
    assert_eq!(loaded, config);
    assert_eq!(origin, path);
}

#[test]
fn test_load_partial_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sensor.toml");
    fs::write(
        &path,
        r#"
        [host]
        log_level = "debug"

        [device]
        read_timeout_ms = 500
        "#,
    )
    .unwrap();

    let (config, _) = SensorConfig::load(Some(path)).unwrap();
    assert_eq!(config.host.log_level, "debug");
    assert_eq!(config.host.tick_interval_ms, 100);
    assert_eq!(config.device.read_timeout_ms, 500);
    assert_eq!(config.detector.blink_interval, 28);
}

#[test]
fn test_load_rejects_invalid_values() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sensor.toml");
    fs::write(&path, "[detector]\nblink_interval = 0\n").unwrap();

    let err = SensorConfig::load(Some(path)).unwrap_err();
    assert!(format!("{:#}", err).contains("blink_interval"));
}

#[test]
fn test_load_rejects_malformed_toml() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sensor.toml");
    fs::write(&path, "[device\nsignature = ").unwrap();

    let err = SensorConfig::load(Some(path)).unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to parse"));
}

#[test]
fn test_load_missing_explicit_path() {
    let dir = TempDir::new().unwrap();
    let result = SensorConfig::load(Some(dir.path().join("absent.toml")));
    assert!(result.is_err());
}
