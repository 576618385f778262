//! Codec lookup with hardware preference.
//!
//! Hardware codecs (CUDA/VAAPI/QSV/V4L2M2M) are tried first when the caller
//! prefers them; software codecs are used otherwise or as the fallback.

use ffmpeg_next::Codec;

use crate::codec::HardwareAcceleration;

fn hw_decoder_names(codec: &str) -> &'static [&'static str] {
    match codec {
        "h264" => &["h264_cuvid", "h264_qsv", "h264_v4l2m2m"],
        "hevc" => &["hevc_cuvid", "hevc_qsv", "hevc_v4l2m2m"],
        "vp8" => &["vp8_cuvid", "vp8_qsv", "vp8_v4l2m2m"],
        "vp9" => &["vp9_cuvid", "vp9_qsv", "vp9_v4l2m2m"],
        "av1" => &["av1_cuvid", "av1_qsv"],
        _ => &[],
    }
}

fn hw_encoder_names(codec: &str) -> &'static [&'static str] {
    match codec {
        "vp8" => &["vp8_vaapi"],
        "vp9" => &["vp9_vaapi", "vp9_qsv"],
        "av1" => &["av1_nvenc", "av1_vaapi", "av1_qsv"],
        _ => &[],
    }
}

/// Software decoders, best first.
fn sw_decoder_names(codec: &str) -> &'static [&'static str] {
    match codec {
        "h264" => &["h264"],
        "hevc" => &["hevc"],
        "vp8" => &["libvpx", "vp8"],
        "vp9" => &["libvpx-vp9", "vp9"],
        "av1" => &["libdav1d", "av1"],
        "mpeg4" => &["mpeg4"],
        _ => &[],
    }
}

/// Software encoders for the WebM codecs.
fn sw_encoder_names(codec: &str) -> &'static [&'static str] {
    match codec {
        "vp8" => &["libvpx"],
        "vp9" => &["libvpx-vp9"],
        "av1" => &["libsvtav1", "libaom-av1"],
        _ => &[],
    }
}

fn first(names: &[&str], find: fn(&str) -> Option<Codec>) -> Option<Codec> {
    names.iter().find_map(|name| find(name))
}

/// Candidate decoders in the order they should be tried.
pub fn decoders(codec: &str, preference: HardwareAcceleration) -> Vec<Codec> {
    let hw = first(hw_decoder_names(codec), ffmpeg_next::decoder::find_by_name);
    let sw = first(sw_decoder_names(codec), ffmpeg_next::decoder::find_by_name);
    order(hw, sw, preference)
}

/// Candidate encoders in the order they should be tried.
pub fn encoders(codec: &str, preference: HardwareAcceleration) -> Vec<Codec> {
    let hw = first(hw_encoder_names(codec), ffmpeg_next::encoder::find_by_name);
    let sw = first(sw_encoder_names(codec), ffmpeg_next::encoder::find_by_name);
    order(hw, sw, preference)
}

fn order(hw: Option<Codec>, sw: Option<Codec>, preference: HardwareAcceleration) -> Vec<Codec> {
    let (first, second) = match preference {
        HardwareAcceleration::PreferHardware => (hw, sw),
        HardwareAcceleration::NoPreference => (sw, hw),
        HardwareAcceleration::PreferSoftware => (sw, None),
    };
    first.into_iter().chain(second).collect()
}
