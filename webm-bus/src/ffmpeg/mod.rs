//! FFmpeg-backed collaborators: container demuxer, decoders and the WebM encoders.

mod decoder;
mod encoder;
mod frame;
mod hw;
mod input;
mod scaler;

use async_trait::async_trait;
use ffmpeg_next::Rational;

pub use self::{decoder::AvDecoder, encoder::AvEncoder, frame::AvFrameBuffer, input::AvDemuxer};
use crate::{
    codec::{CodecFactory, CodecOutput, EncoderConfig, HardwareAcceleration, VideoDecoder, VideoEncoder},
    demux::{Demuxer, DemuxerFactory},
    error::Result,
    frame::RawFrame,
    sample::{ConfigRecord, EncodedOutput},
    webm::codec_id,
};

/// Codec timestamps are microseconds.
pub(crate) const TIME_BASE: Rational = Rational(1, 1_000_000);

/// Creates FFmpeg decoders and encoders.
#[derive(Clone, Copy, Debug, Default)]
pub struct FfmpegCodecs {
    decoder_preference: HardwareAcceleration,
}

impl FfmpegCodecs {
    pub fn new(decoder_preference: HardwareAcceleration) -> Self {
        Self { decoder_preference }
    }
}

#[async_trait]
impl CodecFactory for FfmpegCodecs {
    async fn is_decoder_config_supported(&self, config: &ConfigRecord) -> bool {
        config.coded_width > 0
            && config.coded_height > 0
            && !hw::decoders(&config.codec, self.decoder_preference).is_empty()
    }

    async fn is_encoder_config_supported(&self, config: &EncoderConfig) -> bool {
        // libvpx wants even dimensions for 4:2:0
        codec_id(&config.codec).is_some()
            && config.width > 0
            && config.height > 0
            && config.width % 2 == 0
            && config.height % 2 == 0
            && config.bitrate > 0
            && !hw::encoders(&config.codec, config.hardware_acceleration).is_empty()
    }

    fn create_decoder(&self, output: CodecOutput<RawFrame>) -> Result<Box<dyn VideoDecoder>> {
        Ok(Box::new(AvDecoder::new(output, self.decoder_preference)))
    }

    fn create_encoder(
        &self,
        output: CodecOutput<EncodedOutput>,
    ) -> Result<Box<dyn VideoEncoder>> {
        Ok(Box::new(AvEncoder::new(output)))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FfmpegDemuxerFactory;

impl DemuxerFactory for FfmpegDemuxerFactory {
    fn create_demuxer(&self) -> Box<dyn Demuxer> {
        Box::new(AvDemuxer)
    }
}
