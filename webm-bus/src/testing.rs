//! In-memory collaborators for stage and pipeline tests.

use std::{
    any::Any,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream};

use crate::{
    codec::{CodecFactory, CodecOutput, EncoderConfig, VideoDecoder, VideoEncoder},
    demux::{DemuxHandler, Demuxer, DemuxerFactory, SourceFile},
    error::{Error, Result},
    frame::{FrameBuffer, RawFrame},
    mux::{Muxer, MuxerFactory},
    render::RenderCallback,
    sample::{ConfigRecord, EncodedOutput, EncodedSample, MuxedChunk, SampleKind},
    stage::ItemStream,
    upload::Uploader,
};

pub const FRAME_DURATION_US: i64 = 33_333;

/// Counts frame buffers handed out and returned.
#[derive(Default)]
pub struct FramePool {
    pub created: AtomicUsize,
    pub released: AtomicUsize,
}

impl FramePool {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn frame(self: &Arc<Self>, width: u32, height: u32, timestamp: i64) -> RawFrame {
        self.created.fetch_add(1, Ordering::SeqCst);
        RawFrame::new(Box::new(MockFrame {
            pool: Arc::clone(self),
            width,
            height,
            timestamp,
        }))
    }
}

pub struct MockFrame {
    pool: Arc<FramePool>,
    width: u32,
    height: u32,
    timestamp: i64,
}

impl FrameBuffer for MockFrame {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn to_i420(&self) -> Option<Bytes> {
        let luma = (self.width * self.height) as usize;
        let mut data = vec![0x80u8; luma + luma / 2];
        data[..luma].fill(0x40);
        Some(Bytes::from(data))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn release(self: Box<Self>) {
        self.pool.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Codec backend whose decoders emit one frame per sample and whose encoder
/// emits one sample per frame.
pub struct MockCodecs {
    pub pool: Arc<FramePool>,
    pub events: Arc<Mutex<Vec<String>>>,
    pub encoder_supported: bool,
    /// (codec, sample index) at which that decoder reports a fault.
    pub fail_decode_at: Option<(String, usize)>,
    /// Frame index at which `encode` rejects the frame.
    pub fail_encode_at: Option<usize>,
    pub encoded_size: usize,
    pub decoders_created: AtomicUsize,
    pub encoders_created: AtomicUsize,
    pub frames_encoded: Arc<AtomicUsize>,
}

impl MockCodecs {
    pub fn new() -> Self {
        Self {
            pool: Arc::new(FramePool::default()),
            events: Arc::new(Mutex::new(Vec::new())),
            encoder_supported: true,
            fail_decode_at: None,
            fail_encode_at: None,
            encoded_size: 1_000,
            decoders_created: AtomicUsize::new(0),
            encoders_created: AtomicUsize::new(0),
            frames_encoded: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn frames_encoded(&self) -> usize {
        self.frames_encoded.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CodecFactory for MockCodecs {
    async fn is_decoder_config_supported(&self, config: &ConfigRecord) -> bool {
        config.codec != "unsupported"
    }

    async fn is_encoder_config_supported(&self, _config: &EncoderConfig) -> bool {
        self.encoder_supported
    }

    fn create_decoder(&self, output: CodecOutput<RawFrame>) -> Result<Box<dyn VideoDecoder>> {
        self.decoders_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockDecoder {
            output,
            pool: Arc::clone(&self.pool),
            events: Arc::clone(&self.events),
            config: None,
            index: 0,
            fail_at: self.fail_decode_at.clone(),
        }))
    }

    fn create_encoder(
        &self,
        output: CodecOutput<EncodedOutput>,
    ) -> Result<Box<dyn VideoEncoder>> {
        self.encoders_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockEncoder {
            output,
            events: Arc::clone(&self.events),
            config: None,
            sample_size: self.encoded_size,
            frames: 0,
            fail_at: self.fail_encode_at,
            encoded: Arc::clone(&self.frames_encoded),
        }))
    }
}

struct MockDecoder {
    output: CodecOutput<RawFrame>,
    pool: Arc<FramePool>,
    events: Arc<Mutex<Vec<String>>>,
    config: Option<ConfigRecord>,
    index: usize,
    fail_at: Option<(String, usize)>,
}

#[async_trait]
impl VideoDecoder for MockDecoder {
    async fn configure(&mut self, config: &ConfigRecord) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(format!("configure {}", config.codec));
        self.config = Some(config.clone());
        Ok(())
    }

    async fn decode(&mut self, sample: &EncodedSample) -> Result<()> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| Error::ProtocolViolation("decode before configure".to_string()))?;
        let index = self.index;
        self.index += 1;
        if let Some((codec, at)) = &self.fail_at {
            if *codec == config.codec && *at == index {
                self.output
                    .error(Error::codec("mock decoder", "corrupt sample"))
                    .await;
                return Ok(());
            }
        }
        self.events
            .lock()
            .unwrap()
            .push(format!("decode {} {}", config.codec, sample.timestamp()));
        let frame = self
            .pool
            .frame(config.coded_width, config.coded_height, sample.timestamp());
        self.output.output(frame).await
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

struct MockEncoder {
    output: CodecOutput<EncodedOutput>,
    events: Arc<Mutex<Vec<String>>>,
    config: Option<EncoderConfig>,
    sample_size: usize,
    frames: usize,
    fail_at: Option<usize>,
    encoded: Arc<AtomicUsize>,
}

#[async_trait]
impl VideoEncoder for MockEncoder {
    async fn configure(&mut self, config: &EncoderConfig) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(format!("configure encoder {}", config.codec));
        self.config = Some(config.clone());
        Ok(())
    }

    async fn encode(&mut self, frame: &RawFrame) -> Result<()> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| Error::ProtocolViolation("encode before configure".to_string()))?;
        if self.fail_at == Some(self.frames) {
            return Err(Error::codec("mock encoder", "rejected frame"));
        }
        let decoder_config = (self.frames == 0)
            .then(|| ConfigRecord::new(config.codec.clone(), config.width, config.height));
        let kind = if self.frames % config.keyframe_interval.max(1) as usize == 0 {
            SampleKind::Key
        } else {
            SampleKind::Delta
        };
        self.frames += 1;
        self.encoded.fetch_add(1, Ordering::SeqCst);
        let sample = EncodedSample::new(vec![0u8; self.sample_size], frame.timestamp(), kind)
            .with_duration(FRAME_DURATION_US);
        self.output
            .output(EncodedOutput {
                sample,
                decoder_config,
            })
            .await
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Emits `configs` config records (codec "h264" unless overridden), then
/// `samples` small samples.
#[derive(Clone)]
pub struct MockDemuxerFactory {
    pub configs: usize,
    pub codec: String,
    pub samples: usize,
    pub emitted: Arc<AtomicUsize>,
}

impl MockDemuxerFactory {
    pub fn new(samples: usize) -> Self {
        Self {
            configs: 1,
            codec: "h264".to_string(),
            samples,
            emitted: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn emitted(&self) -> usize {
        self.emitted.load(Ordering::SeqCst)
    }
}

impl DemuxerFactory for MockDemuxerFactory {
    fn create_demuxer(&self) -> Box<dyn Demuxer> {
        Box::new(MockDemuxer {
            factory: self.clone(),
        })
    }
}

struct MockDemuxer {
    factory: MockDemuxerFactory,
}

#[async_trait]
impl Demuxer for MockDemuxer {
    async fn run(&mut self, _source: &SourceFile, handler: &mut dyn DemuxHandler) -> Result<()> {
        for _ in 0..self.factory.configs {
            handler
                .on_config(ConfigRecord::new(self.factory.codec.clone(), 1280, 720))
                .await?;
        }
        for i in 0..self.factory.samples {
            let kind = if i % 30 == 0 {
                SampleKind::Key
            } else {
                SampleKind::Delta
            };
            let sample = EncodedSample::new(vec![i as u8; 16], i as i64 * FRAME_DURATION_US, kind);
            handler.on_chunk(sample).await?;
            self.factory.emitted.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Muxer that passes each sample's bytes through as one chunk.
#[derive(Default)]
pub struct ChunkMuxerFactory {
    pub frames: Arc<AtomicUsize>,
}

impl ChunkMuxerFactory {
    pub fn frames(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }
}

impl MuxerFactory for ChunkMuxerFactory {
    fn create_muxer(
        &self,
        _config: &EncoderConfig,
        output: CodecOutput<MuxedChunk>,
    ) -> Result<Box<dyn Muxer>> {
        Ok(Box::new(ChunkMuxer {
            output,
            position: 0,
            frames: Arc::clone(&self.frames),
        }))
    }
}

struct ChunkMuxer {
    output: CodecOutput<MuxedChunk>,
    position: u64,
    frames: Arc<AtomicUsize>,
}

#[async_trait]
impl Muxer for ChunkMuxer {
    async fn add_frame(&mut self, sample: &EncodedSample) -> Result<()> {
        self.frames.fetch_add(1, Ordering::SeqCst);
        let chunk = MuxedChunk {
            data: sample.data().clone(),
            position: self.position,
        };
        self.position += sample.size() as u64;
        self.output.output(chunk).await
    }

    async fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Records (filename, size) of every upload. `fail_on` is the 1-based upload that fails.
#[derive(Default)]
pub struct RecordingUploader {
    pub uploads: Mutex<Vec<(String, usize)>>,
    pub fail_on: Option<usize>,
}

impl RecordingUploader {
    pub fn uploads(&self) -> Vec<(String, usize)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl Uploader for RecordingUploader {
    async fn upload_file(&self, filename: &str, file_buffer: Bytes) -> Result<()> {
        let mut uploads = self.uploads.lock().unwrap();
        if self.fail_on == Some(uploads.len() + 1) {
            return Err(Error::upload(filename, "503 Service Unavailable"));
        }
        uploads.push((filename.to_string(), file_buffer.len()));
        Ok(())
    }
}

/// Render callback that counts and closes every frame.
pub fn counting_renderer() -> (RenderCallback, Arc<AtomicUsize>) {
    let rendered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&rendered);
    let render: RenderCallback = Arc::new(move |frame: RawFrame| {
        counter.fetch_add(1, Ordering::SeqCst);
        frame.close();
    });
    (render, rendered)
}

pub fn item_stream<T: Send + 'static>(items: Vec<Result<T>>) -> ItemStream<T> {
    Box::pin(stream::iter(items))
}

/// Reads `input` up to and including its first error.
pub async fn collect<T>(mut input: ItemStream<T>) -> (Vec<T>, Option<Error>) {
    let mut items = Vec::new();
    while let Some(item) = input.next().await {
        match item {
            Ok(item) => items.push(item),
            Err(e) => return (items, Some(e)),
        }
    }
    (items, None)
}
