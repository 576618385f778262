use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::{
    codec::{CodecOutput, EncoderConfig},
    error::{Error, Result},
    sample::{EncodedSample, MuxedChunk},
    stage::{ItemStream, PACKET_CHAN_CAP, Transform, into_stream},
};

/// Container writer. Bytes go out through the [`CodecOutput`] it was created with.
#[async_trait]
pub trait Muxer: Send {
    async fn add_frame(&mut self, sample: &EncodedSample) -> Result<()>;
    /// Writes whatever the container needs after the last frame.
    async fn finish(&mut self) -> Result<()>;
}

pub trait MuxerFactory: Send + Sync {
    fn create_muxer(
        &self,
        config: &EncoderConfig,
        output: CodecOutput<MuxedChunk>,
    ) -> Result<Box<dyn Muxer>>;
}

pub struct MuxStage {
    muxers: Arc<dyn MuxerFactory>,
    config: EncoderConfig,
    cancel: CancellationToken,
}

impl MuxStage {
    pub fn new(
        muxers: Arc<dyn MuxerFactory>,
        config: EncoderConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            muxers,
            config,
            cancel,
        }
    }

    async fn run(
        self,
        mut input: ItemStream<EncodedSample>,
        output: CodecOutput<MuxedChunk>,
    ) -> Result<()> {
        let mut muxer = self.muxers.create_muxer(&self.config, output.clone())?;
        let mut frames: u64 = 0;
        while let Some(item) = input.next().await {
            let sample = item?;
            if output.has_failed() {
                return Err(Error::Cancelled);
            }
            muxer.add_frame(&sample).await?;
            frames += 1;
        }
        muxer.finish().await?;
        log::info!("mux stage finished: {} frames", frames);
        Ok(())
    }
}

impl Transform for MuxStage {
    type Input = EncodedSample;
    type Output = MuxedChunk;

    fn pipe(self, input: ItemStream<EncodedSample>) -> ItemStream<MuxedChunk> {
        let (output, rx) = CodecOutput::channel("mux", PACKET_CHAN_CAP);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let err_output = output.clone();
            tokio::select! {
                result = self.run(input, output) => {
                    if let Err(e) = result {
                        log::warn!("mux stage aborted: {}", e);
                        err_output.error(e).await;
                    }
                }
                _ = cancel.cancelled() => {
                    err_output.error(Error::Cancelled).await;
                }
            }
        });
        into_stream(rx)
    }
}

#[cfg(test)]
#[path = "mux_test.rs"]
mod mux_test;
