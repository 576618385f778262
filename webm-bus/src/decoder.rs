use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    codec::{CodecFactory, CodecOutput, VideoDecoder},
    demux::{DemuxHandler, Demuxer, SourceFile},
    error::{Error, Result},
    frame::RawFrame,
    sample::{ConfigRecord, EncodedSample},
    stage::{FRAME_CHAN_CAP, ItemStream, into_stream},
};

/// Demux + decode: turns the source file into decoded frames.
pub struct DecodeStage {
    codecs: Arc<dyn CodecFactory>,
    demuxer: Box<dyn Demuxer>,
    cancel: CancellationToken,
}

impl DecodeStage {
    pub fn new(
        codecs: Arc<dyn CodecFactory>,
        demuxer: Box<dyn Demuxer>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            codecs,
            demuxer,
            cancel,
        }
    }

    /// Starts reading `source`. Frames come out in decoder output order.
    pub fn open(self, source: SourceFile) -> ItemStream<RawFrame> {
        let (output, rx) = CodecOutput::channel("decode", FRAME_CHAN_CAP);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let err_output = output.clone();
            tokio::select! {
                result = self.run(source, output) => {
                    if let Err(e) = result {
                        log::warn!("decode stage aborted: {}", e);
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

    async fn run(mut self, source: SourceFile, output: CodecOutput<RawFrame>) -> Result<()> {
        log::info!("decode stage started: {}", source.name());
        let decoder = self.codecs.create_decoder(output.clone())?;
        let mut handler = DecodeHandler {
            codecs: Arc::clone(&self.codecs),
            decoder,
            output,
            config: None,
            samples: 0,
        };

        self.demuxer.run(&source, &mut handler).await?;
        if handler.config.is_none() {
            return Err(Error::ProtocolViolation(
                "demuxer finished without a decoder config".to_string(),
            ));
        }
        handler.decoder.flush().await?;
        if handler.output.has_failed() {
            return Err(Error::Cancelled);
        }
        log::info!("decode stage finished: {} samples", handler.samples);
        Ok(())
    }
}

struct DecodeHandler {
    codecs: Arc<dyn CodecFactory>,
    decoder: Box<dyn VideoDecoder>,
    output: CodecOutput<RawFrame>,
    config: Option<ConfigRecord>,
    samples: u64,
}

#[async_trait]
impl DemuxHandler for DecodeHandler {
    async fn on_config(&mut self, config: ConfigRecord) -> Result<()> {
        if let Some(current) = &self.config {
            return Err(Error::ProtocolViolation(format!(
                "second decoder config {:?} after {:?}",
                config.codec, current.codec
            )));
        }
        if !self.codecs.is_decoder_config_supported(&config).await {
            return Err(Error::ConfigUnsupported(format!(
                "decoder {} {}x{}",
                config.codec, config.coded_width, config.coded_height
            )));
        }
        log::debug!(
            "decoder config: {} {}x{}",
            config.codec,
            config.coded_width,
            config.coded_height
        );
        self.decoder.configure(&config).await?;
        self.config = Some(config);
        Ok(())
    }

    async fn on_chunk(&mut self, sample: EncodedSample) -> Result<()> {
        if self.config.is_none() {
            return Err(Error::ProtocolViolation(format!(
                "sample @{} before decoder config",
                sample.timestamp()
            )));
        }
        // the decoder already reported its failure downstream
        if self.output.has_failed() {
            return Err(Error::Cancelled);
        }
        log::trace!(
            "decode sample: ts {}, size {}, key {}",
            sample.timestamp(),
            sample.size(),
            sample.is_key()
        );
        self.decoder.decode(&sample).await?;
        self.samples += 1;
        Ok(())
    }
}

#[cfg(test)]
#[path = "decoder_test.rs"]
mod decoder_test;
