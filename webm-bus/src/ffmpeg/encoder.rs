use async_trait::async_trait;
use bytes::Bytes;
use ffmpeg_next::{
    Dictionary, Rational,
    codec::packet::Packet,
    format::Pixel,
    frame::Video,
    picture,
};

use crate::{
    codec::{CodecOutput, EncoderConfig, VideoEncoder},
    error::{Error, Result},
    frame::RawFrame,
    sample::{ConfigRecord, EncodedOutput, EncodedSample, SampleKind},
};

use super::{
    TIME_BASE,
    frame::{AvFrameBuffer, from_i420},
    hw,
    scaler::Scaler,
};

struct Inner {
    encoder: ffmpeg_next::codec::encoder::Video,
    config: EncoderConfig,
    frame_index: u64,
    config_sent: bool,
}

impl Inner {
    fn open(config: &EncoderConfig) -> Result<Self> {
        let candidates = hw::encoders(&config.codec, config.hardware_acceleration);
        if candidates.is_empty() {
            return Err(Error::ConfigUnsupported(format!(
                "no ffmpeg encoder for {}",
                config.codec
            )));
        }

        // a hardware encoder that fails to open falls back to the next candidate
        let mut last_err = None;
        for codec in candidates {
            let name = codec.name().to_string();
            match Self::open_with(codec, config) {
                Ok(encoder) => {
                    log::info!("encoder opened: {}", name);
                    return Ok(Self {
                        encoder,
                        config: config.clone(),
                        frame_index: 0,
                        config_sent: false,
                    });
                }
                Err(e) => {
                    log::warn!("encoder {} failed to open: {}", name, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::codec("ffmpeg encoder", "no encoder opened")))
    }

    fn open_with(
        codec: ffmpeg_next::Codec,
        config: &EncoderConfig,
    ) -> Result<ffmpeg_next::codec::encoder::Video> {
        let ctx = ffmpeg_next::codec::Context::new_with_codec(codec);
        let mut encoder = ctx
            .encoder()
            .video()
            .map_err(|e| Error::codec("ffmpeg encoder", e))?;
        encoder.set_width(config.width);
        encoder.set_height(config.height);
        encoder.set_format(Pixel::YUV420P);
        encoder.set_bit_rate(config.bitrate as usize);
        encoder.set_frame_rate(Some(Rational(config.framerate.max(1) as i32, 1)));
        encoder.set_time_base(TIME_BASE);
        encoder.set_gop(config.keyframe_interval);

        let mut opts = Dictionary::new();
        opts.set("deadline", "realtime");
        opts.set("cpu-used", "8");
        opts.set("lag-in-frames", "0");
        encoder
            .open_with(opts)
            .map_err(|e| Error::codec("ffmpeg encoder", e))
    }

    /// Codec private data of the opened encoder, if it has any.
    fn extradata(&self) -> Option<Bytes> {
        unsafe {
            let ptr = self.encoder.0.as_ptr();
            let size = (*ptr).extradata_size;
            if (*ptr).extradata.is_null() || size <= 0 {
                return None;
            }
            let data = std::slice::from_raw_parts((*ptr).extradata, size as usize);
            Some(Bytes::copy_from_slice(data))
        }
    }

    fn encode(&mut self, frame: Option<Video>) -> Result<Vec<EncodedOutput>> {
        let sent = match frame {
            Some(mut frame) => {
                if self.frame_index % self.config.keyframe_interval.max(1) as u64 == 0 {
                    frame.set_kind(picture::Type::I);
                }
                self.frame_index += 1;
                self.encoder.send_frame(&frame)
            }
            None => self.encoder.send_eof(),
        };
        sent.map_err(|e| Error::codec("ffmpeg encoder", e))?;

        let mut outputs = Vec::new();
        loop {
            let mut packet = Packet::empty();
            match self.encoder.receive_packet(&mut packet) {
                Ok(()) => outputs.push(self.output_for(&packet)),
                Err(ffmpeg_next::Error::Eof) => break,
                Err(ffmpeg_next::Error::Other { errno })
                    if errno == ffmpeg_next::util::error::EAGAIN =>
                {
                    break;
                }
                Err(err) => return Err(Error::codec("ffmpeg encoder", err)),
            }
        }
        Ok(outputs)
    }

    fn output_for(&mut self, packet: &Packet) -> EncodedOutput {
        let kind = if packet.is_key() {
            SampleKind::Key
        } else {
            SampleKind::Delta
        };
        let data = packet.data().map(Bytes::copy_from_slice).unwrap_or_default();
        let mut sample = EncodedSample::new(data, packet.pts().unwrap_or_default(), kind);
        if packet.duration() > 0 {
            sample = sample.with_duration(packet.duration());
        } else if self.config.framerate > 0 {
            sample = sample.with_duration(1_000_000 / self.config.framerate as i64);
        }

        let decoder_config = if self.config_sent {
            None
        } else {
            self.config_sent = true;
            let mut record =
                ConfigRecord::new(self.config.codec.clone(), self.config.width, self.config.height);
            if let Some(extradata) = self.extradata() {
                record = record.with_description(extradata);
            }
            Some(record)
        };

        EncodedOutput {
            sample,
            decoder_config,
        }
    }
}

/// FFmpeg encoder for the WebM codecs. Frames are scaled to the target size
/// before they are handed to the codec.
pub struct AvEncoder {
    inner: Option<Inner>,
    scaler: Option<Scaler>,
    output: CodecOutput<EncodedOutput>,
}

impl AvEncoder {
    pub fn new(output: CodecOutput<EncodedOutput>) -> Self {
        Self {
            inner: None,
            scaler: None,
            output,
        }
    }

    fn prepare(&mut self, frame: &RawFrame) -> Result<Video> {
        let scaler = self
            .scaler
            .as_mut()
            .ok_or_else(|| Error::ProtocolViolation("encoder used before configure".to_string()))?;
        let mut scaled = match frame.buffer::<AvFrameBuffer>() {
            Some(buffer) => scaler.run(buffer.frame())?,
            None => {
                let i420 = frame
                    .to_i420()
                    .ok_or_else(|| Error::codec("ffmpeg encoder", "frame has no pixel data"))?;
                let source = from_i420(&i420, frame.width(), frame.height())
                    .ok_or_else(|| Error::codec("ffmpeg encoder", "short i420 buffer"))?;
                scaler.run(&source)?
            }
        };
        scaled.set_pts(Some(frame.timestamp()));
        Ok(scaled)
    }

    async fn run(&mut self, frame: Option<Video>) -> Result<()> {
        let mut inner = self
            .inner
            .take()
            .ok_or_else(|| Error::ProtocolViolation("encoder used before configure".to_string()))?;
        let (inner, outputs) = tokio::task::spawn_blocking(move || {
            let outputs = inner.encode(frame);
            (inner, outputs)
        })
        .await
        .map_err(|e| Error::codec("ffmpeg encoder", e))?;
        self.inner = Some(inner);

        for output in outputs? {
            self.output.output(output).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl VideoEncoder for AvEncoder {
    async fn configure(&mut self, config: &EncoderConfig) -> Result<()> {
        let config = config.clone();
        let (width, height) = (config.width, config.height);
        let inner = tokio::task::spawn_blocking(move || Inner::open(&config))
            .await
            .map_err(|e| Error::codec("ffmpeg encoder", e))??;
        self.inner = Some(inner);
        self.scaler = Some(Scaler::new(Pixel::YUV420P, width, height));
        Ok(())
    }

    async fn encode(&mut self, frame: &RawFrame) -> Result<()> {
        let scaled = self.prepare(frame)?;
        self.run(Some(scaled)).await
    }

    async fn flush(&mut self) -> Result<()> {
        if self.inner.is_none() {
            return Ok(());
        }
        self.run(None).await
    }
}
