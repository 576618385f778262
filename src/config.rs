use std::{path::PathBuf, str::FromStr, sync::LazyLock};

use webm_bus::{
    codec::{EncoderConfig, HardwareAcceleration},
    upload::SEGMENT_THRESHOLD,
};

pub struct AppConfig {
    upload_url: String,
    segment_threshold: usize,
    encoder: EncoderConfig,
    preview_dir: Option<PathBuf>,
    preview_interval: u64,
}

impl AppConfig {
    /// Reads `LOWRES_*` settings through `lookup`; unset or unparsable values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parse<T: FromStr>(value: Option<String>, key: &str, default: T) -> T {
            match value {
                Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                    log::warn!("ignoring invalid {}={:?}", key, raw);
                    default
                }),
                None => default,
            }
        }
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let defaults = EncoderConfig::default();
        let hardware_acceleration = match get("LOWRES_HW_ACCEL").as_deref() {
            Some("prefer-hardware") => HardwareAcceleration::PreferHardware,
            Some("no-preference") => HardwareAcceleration::NoPreference,
            _ => HardwareAcceleration::PreferSoftware,
        };
        let encoder = EncoderConfig {
            codec: get("LOWRES_CODEC").unwrap_or(defaults.codec),
            width: parse(get("LOWRES_WIDTH"), "LOWRES_WIDTH", defaults.width),
            height: parse(get("LOWRES_HEIGHT"), "LOWRES_HEIGHT", defaults.height),
            bitrate: parse(get("LOWRES_BITRATE"), "LOWRES_BITRATE", defaults.bitrate),
            framerate: parse(get("LOWRES_FRAMERATE"), "LOWRES_FRAMERATE", defaults.framerate),
            keyframe_interval: parse(
                get("LOWRES_KEYFRAME_INTERVAL"),
                "LOWRES_KEYFRAME_INTERVAL",
                defaults.keyframe_interval,
            ),
            hardware_acceleration,
        };

        Self {
            upload_url: get("LOWRES_UPLOAD_URL")
                .unwrap_or_else(|| "http://localhost:3000/upload".to_string()),
            segment_threshold: parse(
                get("LOWRES_SEGMENT_THRESHOLD"),
                "LOWRES_SEGMENT_THRESHOLD",
                SEGMENT_THRESHOLD,
            ),
            encoder,
            preview_dir: get("LOWRES_PREVIEW_DIR").map(PathBuf::from),
            preview_interval: parse(get("LOWRES_PREVIEW_INTERVAL"), "LOWRES_PREVIEW_INTERVAL", 30),
        }
    }

    pub fn upload_url(&self) -> &str {
        &self.upload_url
    }

    pub fn segment_threshold(&self) -> usize {
        self.segment_threshold
    }

    pub fn encoder(&self) -> &EncoderConfig {
        &self.encoder
    }

    pub fn preview_dir(&self) -> Option<&PathBuf> {
        self.preview_dir.as_ref()
    }

    pub fn preview_interval(&self) -> u64 {
        self.preview_interval
    }
}

pub fn config() -> &'static AppConfig {
    static CONFIG: LazyLock<AppConfig> =
        LazyLock::new(|| AppConfig::from_lookup(|key| std::env::var(key).ok()));
    &CONFIG
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
