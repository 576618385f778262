use async_trait::async_trait;
use ffmpeg_next::{
    codec::packet::{Flags, Packet},
    frame::Video,
};

use crate::{
    codec::{CodecOutput, HardwareAcceleration, VideoDecoder},
    error::{Error, Result},
    frame::RawFrame,
    sample::{ConfigRecord, EncodedSample},
};

use super::{TIME_BASE, frame::AvFrameBuffer, hw};

struct Inner {
    decoder: ffmpeg_next::decoder::Video,
    name: String,
}

impl Inner {
    fn open(config: &ConfigRecord, preference: HardwareAcceleration) -> Result<Self> {
        let candidates = hw::decoders(&config.codec, preference);
        if candidates.is_empty() {
            return Err(Error::ConfigUnsupported(format!(
                "no ffmpeg decoder for {}",
                config.codec
            )));
        }

        let mut last_err = None;
        for codec in candidates {
            let name = codec.name().to_string();
            match Self::open_with(codec, config) {
                Ok(decoder) => {
                    log::info!("decoder opened: {}", name);
                    return Ok(Self { decoder, name });
                }
                Err(e) => {
                    log::warn!("decoder {} failed to open: {}", name, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::codec("ffmpeg decoder", "no decoder opened")))
    }

    fn open_with(codec: ffmpeg_next::Codec, config: &ConfigRecord) -> Result<ffmpeg_next::decoder::Video> {
        let mut ctx = ffmpeg_next::codec::Context::new_with_codec(codec);
        unsafe {
            let ptr = ctx.as_mut_ptr();
            (*ptr).time_base = TIME_BASE.into();
            (*ptr).width = config.coded_width as i32;
            (*ptr).height = config.coded_height as i32;
            if let Some(description) = &config.description {
                let size = description.len();
                let padded = size + ffmpeg_next::ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize;
                let buf = ffmpeg_next::ffi::av_mallocz(padded) as *mut u8;
                if buf.is_null() {
                    return Err(Error::codec("ffmpeg decoder", "extradata allocation failed"));
                }
                std::ptr::copy_nonoverlapping(description.as_ptr(), buf, size);
                (*ptr).extradata = buf;
                (*ptr).extradata_size = size as i32;
            }
        }
        ctx.decoder()
            .video()
            .map_err(|e| Error::codec("ffmpeg decoder", e))
    }

    fn decode(&mut self, packet: Option<Packet>) -> Result<Vec<RawFrame>> {
        let sent = match &packet {
            Some(packet) => self.decoder.send_packet(packet),
            None => self.decoder.send_eof(),
        };
        sent.map_err(|e| Error::codec("ffmpeg decoder", e))?;

        let mut frames = Vec::new();
        loop {
            let mut frame = Video::empty();
            match self.decoder.receive_frame(&mut frame) {
                Ok(()) => {
                    let timestamp = frame.timestamp().or(frame.pts()).unwrap_or_default();
                    frames.push(RawFrame::new(Box::new(AvFrameBuffer::new(frame, timestamp))));
                }
                Err(ffmpeg_next::Error::Eof) => break,
                Err(ffmpeg_next::Error::Other { errno })
                    if errno == ffmpeg_next::util::error::EAGAIN =>
                {
                    break;
                }
                Err(err) => return Err(Error::codec("ffmpeg decoder", err)),
            }
        }
        Ok(frames)
    }
}

/// FFmpeg decoder. Codec work runs on the blocking pool; frames go out through
/// the decoder's [`CodecOutput`] in presentation order.
pub struct AvDecoder {
    inner: Option<Inner>,
    output: CodecOutput<RawFrame>,
    preference: HardwareAcceleration,
}

impl AvDecoder {
    pub fn new(output: CodecOutput<RawFrame>, preference: HardwareAcceleration) -> Self {
        Self {
            inner: None,
            output,
            preference,
        }
    }

    async fn run(&mut self, packet: Option<Packet>) -> Result<()> {
        let mut inner = self
            .inner
            .take()
            .ok_or_else(|| Error::ProtocolViolation("decoder used before configure".to_string()))?;
        let (inner, frames) = tokio::task::spawn_blocking(move || {
            let frames = inner.decode(packet);
            (inner, frames)
        })
        .await
        .map_err(|e| Error::codec("ffmpeg decoder", e))?;
        self.inner = Some(inner);

        for frame in frames? {
            self.output.output(frame).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl VideoDecoder for AvDecoder {
    async fn configure(&mut self, config: &ConfigRecord) -> Result<()> {
        let config = config.clone();
        let preference = self.preference;
        let inner = tokio::task::spawn_blocking(move || Inner::open(&config, preference))
            .await
            .map_err(|e| Error::codec("ffmpeg decoder", e))??;
        if let Some(previous) = self.inner.replace(inner) {
            log::debug!("decoder {} replaced", previous.name);
        }
        Ok(())
    }

    async fn decode(&mut self, sample: &EncodedSample) -> Result<()> {
        let mut packet = Packet::copy(sample.data());
        packet.set_pts(Some(sample.timestamp()));
        if let Some(duration) = sample.duration() {
            packet.set_duration(duration);
        }
        if sample.is_key() {
            packet.set_flags(Flags::KEY);
        }
        self.run(Some(packet)).await
    }

    async fn flush(&mut self) -> Result<()> {
        if self.inner.is_none() {
            return Ok(());
        }
        self.run(None).await
    }
}
