use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{
    error::{Error, Result},
    frame::RawFrame,
    sample::{ConfigRecord, EncodedOutput, EncodedSample},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum HardwareAcceleration {
    NoPreference,
    PreferHardware,
    #[default]
    PreferSoftware,
}

/// Target encode configuration.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EncoderConfig {
    // "vp8", "vp9", "av1"
    pub codec: String,
    pub width: u32,
    pub height: u32,
    // bps
    pub bitrate: u64,
    pub framerate: u32,
    pub keyframe_interval: u32,
    pub hardware_acceleration: HardwareAcceleration,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            codec: "vp9".to_string(),
            width: 256,
            height: 144,
            bitrate: 10_000_000,
            framerate: 30,
            keyframe_interval: 60,
            hardware_acceleration: HardwareAcceleration::PreferSoftware,
        }
    }
}

impl EncoderConfig {
    /// Label used in upload filenames, e.g. "144p".
    pub fn resolution(&self) -> String {
        format!("{}p", self.height)
    }
}

/// Output side handed to a codec or muxer when it is created.
///
/// Backed by a bounded channel: `output` waits while the consuming stage is
/// behind, which is how slow consumers throttle the codec.
pub struct CodecOutput<T> {
    stage: &'static str,
    tx: mpsc::Sender<Result<T>>,
    failed: Arc<AtomicBool>,
}

impl<T> Clone for CodecOutput<T> {
    fn clone(&self) -> Self {
        Self {
            stage: self.stage,
            tx: self.tx.clone(),
            failed: Arc::clone(&self.failed),
        }
    }
}

impl<T: Send> CodecOutput<T> {
    pub fn channel(stage: &'static str, capacity: usize) -> (Self, mpsc::Receiver<Result<T>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                stage,
                tx,
                failed: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    /// Delivers one output item. Fails with `Cancelled` once the reader is gone.
    pub async fn output(&self, item: T) -> Result<()> {
        self.tx.send(Ok(item)).await.map_err(|_| Error::Cancelled)
    }

    /// Reports an asynchronous failure; the reader sees it in order with the outputs.
    ///
    /// The flag is raised only once the error holds a slot in the channel, so whoever
    /// observes `has_failed` can never get an item in ahead of it.
    pub async fn error(&self, err: Error) {
        log::debug!("{} output failed: {}", self.stage, err);
        match self.tx.reserve().await {
            Ok(permit) => {
                self.failed.store(true, Ordering::Release);
                permit.send(Err(err));
            }
            Err(_) => self.failed.store(true, Ordering::Release),
        }
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }
}

#[async_trait]
pub trait VideoDecoder: Send {
    async fn configure(&mut self, config: &ConfigRecord) -> Result<()>;
    /// Queues one sample; frames are delivered through the decoder's [`CodecOutput`].
    async fn decode(&mut self, sample: &EncodedSample) -> Result<()>;
    /// Emits every pending frame.
    async fn flush(&mut self) -> Result<()>;
}

#[async_trait]
pub trait VideoEncoder: Send {
    async fn configure(&mut self, config: &EncoderConfig) -> Result<()>;
    /// Queues one frame. The encoder copies what it needs; the caller still owns `frame`.
    async fn encode(&mut self, frame: &RawFrame) -> Result<()>;
    async fn flush(&mut self) -> Result<()>;
}

/// Creates codec instances. One decoder and one encoder per run, plus the render decoder.
#[async_trait]
pub trait CodecFactory: Send + Sync {
    async fn is_decoder_config_supported(&self, config: &ConfigRecord) -> bool;
    async fn is_encoder_config_supported(&self, config: &EncoderConfig) -> bool;
    fn create_decoder(&self, output: CodecOutput<RawFrame>) -> Result<Box<dyn VideoDecoder>>;
    fn create_encoder(&self, output: CodecOutput<EncodedOutput>)
    -> Result<Box<dyn VideoEncoder>>;
}
