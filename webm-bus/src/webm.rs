//! Streaming WebM writer for a single video track.
//!
//! Segment and clusters are written with unknown size so every block can be
//! handed downstream as soon as it is muxed; nothing is patched afterwards.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    codec::{CodecOutput, EncoderConfig},
    error::{Error, Result},
    mux::{Muxer, MuxerFactory},
    sample::{EncodedSample, MuxedChunk},
};

mod ids {
    pub const EBML: u32 = 0x1A45DFA3;
    pub const EBML_VERSION: u32 = 0x4286;
    pub const EBML_READ_VERSION: u32 = 0x42F7;
    pub const EBML_MAX_ID_LENGTH: u32 = 0x42F2;
    pub const EBML_MAX_SIZE_LENGTH: u32 = 0x42F3;
    pub const DOC_TYPE: u32 = 0x4282;
    pub const DOC_TYPE_VERSION: u32 = 0x4287;
    pub const DOC_TYPE_READ_VERSION: u32 = 0x4285;

    pub const SEGMENT: u32 = 0x18538067;
    pub const INFO: u32 = 0x1549A966;
    pub const TIMECODE_SCALE: u32 = 0x2AD7B1;
    pub const MUXING_APP: u32 = 0x4D80;
    pub const WRITING_APP: u32 = 0x5741;

    pub const TRACKS: u32 = 0x1654AE6B;
    pub const TRACK_ENTRY: u32 = 0xAE;
    pub const TRACK_NUMBER: u32 = 0xD7;
    pub const TRACK_UID: u32 = 0x73C5;
    pub const TRACK_TYPE: u32 = 0x83;
    pub const FLAG_LACING: u32 = 0x9C;
    pub const DEFAULT_DURATION: u32 = 0x23E383;
    pub const CODEC_ID: u32 = 0x86;
    pub const VIDEO: u32 = 0xE0;
    pub const PIXEL_WIDTH: u32 = 0xB0;
    pub const PIXEL_HEIGHT: u32 = 0xBA;

    pub const CLUSTER: u32 = 0x1F43B675;
    pub const TIMESTAMP: u32 = 0xE7;
    pub const SIMPLE_BLOCK: u32 = 0xA3;
}

/// 1 ms per timecode unit.
pub const TIMECODE_SCALE_NS: u64 = 1_000_000;
const TRACK_NUMBER: u64 = 1;
const TRACK_TYPE_VIDEO: u64 = 1;
const UNKNOWN_SIZE: [u8; 8] = [0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
const KEYFRAME_FLAG: u8 = 0x80;
const APP_NAME: &str = concat!("webm-bus-", env!("CARGO_PKG_VERSION"));

/// Matroska codec id for a codec name, if WebM can carry it.
pub fn codec_id(codec: &str) -> Option<&'static str> {
    match codec.to_ascii_lowercase().as_str() {
        "vp8" => Some("V_VP8"),
        "vp9" => Some("V_VP9"),
        "av1" => Some("V_AV1"),
        _ => None,
    }
}

fn write_id(buf: &mut BytesMut, id: u32) {
    let bytes = id.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    buf.put_slice(&bytes[skip..]);
}

fn write_size(buf: &mut BytesMut, size: u64) {
    let mut len = 1;
    // all-ones is reserved for "unknown"
    while len < 8 && size >= (1u64 << (7 * len)) - 1 {
        len += 1;
    }
    let marked = size | (1u64 << (7 * len));
    buf.put_slice(&marked.to_be_bytes()[8 - len..]);
}

fn write_uint(buf: &mut BytesMut, id: u32, value: u64) {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count().min(7);
    write_id(buf, id);
    write_size(buf, (8 - skip) as u64);
    buf.put_slice(&bytes[skip..]);
}

fn write_bytes(buf: &mut BytesMut, id: u32, data: &[u8]) {
    write_id(buf, id);
    write_size(buf, data.len() as u64);
    buf.put_slice(data);
}

fn write_str(buf: &mut BytesMut, id: u32, value: &str) {
    write_bytes(buf, id, value.as_bytes());
}

fn write_master(buf: &mut BytesMut, id: u32, body: impl FnOnce(&mut BytesMut)) {
    let mut inner = BytesMut::new();
    body(&mut inner);
    write_bytes(buf, id, &inner);
}

struct TrackInfo {
    codec_id: &'static str,
    width: u32,
    height: u32,
    framerate: u32,
}

pub struct WebmMuxer {
    track: TrackInfo,
    output: CodecOutput<MuxedChunk>,
    position: u64,
    header_written: bool,
    cluster_timecode: Option<i64>,
    frames: u64,
}

impl WebmMuxer {
    pub fn new(config: &EncoderConfig, output: CodecOutput<MuxedChunk>) -> Result<Self> {
        let codec_id = codec_id(&config.codec).ok_or_else(|| {
            Error::ConfigUnsupported(format!("codec {} cannot be muxed into webm", config.codec))
        })?;
        Ok(Self {
            track: TrackInfo {
                codec_id,
                width: config.width,
                height: config.height,
                framerate: config.framerate,
            },
            output,
            position: 0,
            header_written: false,
            cluster_timecode: None,
            frames: 0,
        })
    }

    fn write_header(&self, buf: &mut BytesMut) {
        write_master(buf, ids::EBML, |b| {
            write_uint(b, ids::EBML_VERSION, 1);
            write_uint(b, ids::EBML_READ_VERSION, 1);
            write_uint(b, ids::EBML_MAX_ID_LENGTH, 4);
            write_uint(b, ids::EBML_MAX_SIZE_LENGTH, 8);
            write_str(b, ids::DOC_TYPE, "webm");
            write_uint(b, ids::DOC_TYPE_VERSION, 4);
            write_uint(b, ids::DOC_TYPE_READ_VERSION, 2);
        });

        write_id(buf, ids::SEGMENT);
        buf.put_slice(&UNKNOWN_SIZE);

        write_master(buf, ids::INFO, |b| {
            write_uint(b, ids::TIMECODE_SCALE, TIMECODE_SCALE_NS);
            write_str(b, ids::MUXING_APP, APP_NAME);
            write_str(b, ids::WRITING_APP, APP_NAME);
        });

        let track = &self.track;
        write_master(buf, ids::TRACKS, |b| {
            write_master(b, ids::TRACK_ENTRY, |t| {
                write_uint(t, ids::TRACK_NUMBER, TRACK_NUMBER);
                write_uint(t, ids::TRACK_UID, TRACK_NUMBER);
                write_uint(t, ids::TRACK_TYPE, TRACK_TYPE_VIDEO);
                write_uint(t, ids::FLAG_LACING, 0);
                write_str(t, ids::CODEC_ID, track.codec_id);
                if track.framerate > 0 {
                    write_uint(
                        t,
                        ids::DEFAULT_DURATION,
                        1_000_000_000 / track.framerate as u64,
                    );
                }
                write_master(t, ids::VIDEO, |v| {
                    write_uint(v, ids::PIXEL_WIDTH, track.width as u64);
                    write_uint(v, ids::PIXEL_HEIGHT, track.height as u64);
                });
            });
        });
    }

    fn needs_cluster(&self, sample: &EncodedSample, timecode: i64) -> bool {
        match self.cluster_timecode {
            None => true,
            Some(start) => {
                let relative = timecode - start;
                sample.is_key() || relative > i16::MAX as i64 || relative < i16::MIN as i64
            }
        }
    }

    fn write_block(&mut self, buf: &mut BytesMut, sample: &EncodedSample) {
        let timecode = (sample.timestamp() / 1000).max(0);
        if self.needs_cluster(sample, timecode) {
            write_id(buf, ids::CLUSTER);
            buf.put_slice(&UNKNOWN_SIZE);
            write_uint(buf, ids::TIMESTAMP, timecode as u64);
            self.cluster_timecode = Some(timecode);
        }
        let relative = (timecode - self.cluster_timecode.unwrap_or(timecode)) as i16;

        write_id(buf, ids::SIMPLE_BLOCK);
        write_size(buf, 4 + sample.size() as u64);
        // track number as a 1 byte vint
        buf.put_u8(0x80 | TRACK_NUMBER as u8);
        buf.put_i16(relative);
        buf.put_u8(if sample.is_key() { KEYFRAME_FLAG } else { 0 });
        buf.put_slice(sample.data());
    }

    async fn emit(&mut self, data: Bytes) -> Result<()> {
        let position = self.position;
        self.position += data.len() as u64;
        self.output.output(MuxedChunk { data, position }).await
    }
}

#[async_trait]
impl Muxer for WebmMuxer {
    async fn add_frame(&mut self, sample: &EncodedSample) -> Result<()> {
        let mut buf = BytesMut::with_capacity(sample.size() + 64);
        if !self.header_written {
            self.write_header(&mut buf);
            self.header_written = true;
        }
        self.write_block(&mut buf, sample);
        self.frames += 1;
        self.emit(buf.freeze()).await
    }

    async fn finish(&mut self) -> Result<()> {
        log::debug!(
            "webm muxer finished: {} frames, {} bytes",
            self.frames,
            self.position
        );
        Ok(())
    }
}

/// Creates a [`WebmMuxer`] per run.
#[derive(Default)]
pub struct WebmMuxerFactory;

impl MuxerFactory for WebmMuxerFactory {
    fn create_muxer(
        &self,
        config: &EncoderConfig,
        output: CodecOutput<MuxedChunk>,
    ) -> Result<Box<dyn Muxer>> {
        Ok(Box::new(WebmMuxer::new(config, output)?))
    }
}
