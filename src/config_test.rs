use std::collections::HashMap;

use webm_bus::codec::HardwareAcceleration;

use crate::config::AppConfig;

fn from_map(vars: &[(&str, &str)]) -> AppConfig {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    AppConfig::from_lookup(|key| vars.get(key).cloned())
}

#[test]
fn test_defaults() {
    let config = from_map(&[]);
    assert_eq!(config.upload_url(), "http://localhost:3000/upload");
    assert_eq!(config.segment_threshold(), 10_000_000);
    assert_eq!(config.encoder().codec, "vp9");
    assert_eq!((config.encoder().width, config.encoder().height), (256, 144));
    assert_eq!(config.encoder().bitrate, 10_000_000);
    assert_eq!(config.encoder().framerate, 30);
    assert_eq!(
        config.encoder().hardware_acceleration,
        HardwareAcceleration::PreferSoftware
    );
    assert!(config.preview_dir().is_none());
    assert_eq!(config.encoder().resolution(), "144p");
}

#[test]
fn test_overrides() {
    let config = from_map(&[
        ("LOWRES_UPLOAD_URL", "http://storage:9000/put"),
        ("LOWRES_SEGMENT_THRESHOLD", "5000000"),
        ("LOWRES_CODEC", "vp8"),
        ("LOWRES_WIDTH", "426"),
        ("LOWRES_HEIGHT", "240"),
        ("LOWRES_HW_ACCEL", "prefer-hardware"),
        ("LOWRES_PREVIEW_DIR", "/tmp/previews"),
    ]);
    assert_eq!(config.upload_url(), "http://storage:9000/put");
    assert_eq!(config.segment_threshold(), 5_000_000);
    assert_eq!(config.encoder().codec, "vp8");
    assert_eq!(config.encoder().resolution(), "240p");
    assert_eq!(
        config.encoder().hardware_acceleration,
        HardwareAcceleration::PreferHardware
    );
    assert_eq!(
        config.preview_dir().map(|p| p.to_string_lossy().into_owned()),
        Some("/tmp/previews".to_string())
    );
}

#[test]
fn test_invalid_values_keep_defaults() {
    let config = from_map(&[
        ("LOWRES_BITRATE", "fast"),
        ("LOWRES_FRAMERATE", ""),
        ("LOWRES_SEGMENT_THRESHOLD", "-1"),
    ]);
    assert_eq!(config.encoder().bitrate, 10_000_000);
    assert_eq!(config.encoder().framerate, 30);
    assert_eq!(config.segment_threshold(), 10_000_000);
}
