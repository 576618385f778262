use std::sync::Arc;

use futures::{StreamExt, stream};
use tokio_util::sync::CancellationToken;

use crate::{
    codec::{CodecFactory, CodecOutput, EncoderConfig},
    error::{Error, Result},
    frame::RawFrame,
    sample::{EncodedItem, EncodedOutput},
    stage::{ItemStream, PACKET_CHAN_CAP, Transform, into_stream},
};

/// Re-encodes decoded frames for the low resolution target.
pub struct EncodeStage {
    codecs: Arc<dyn CodecFactory>,
    config: EncoderConfig,
    cancel: CancellationToken,
}

impl EncodeStage {
    /// Validates `config` against the encoder backend. Nothing is encoded on failure.
    pub async fn configure(
        codecs: Arc<dyn CodecFactory>,
        config: EncoderConfig,
        cancel: CancellationToken,
    ) -> Result<Self> {
        if !codecs.is_encoder_config_supported(&config).await {
            log::error!("encoder config not supported: {:?}", config);
            return Err(Error::ConfigUnsupported(format!(
                "encoder {} {}x{} @{}bps",
                config.codec, config.width, config.height, config.bitrate
            )));
        }
        Ok(Self {
            codecs,
            config,
            cancel,
        })
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    async fn run(self, mut input: ItemStream<RawFrame>, output: CodecOutput<EncodedOutput>) -> Result<()> {
        let mut encoder = self.codecs.create_encoder(output.clone())?;
        encoder.configure(&self.config).await?;
        log::info!(
            "encode stage started: {} {}x{}",
            self.config.codec,
            self.config.width,
            self.config.height
        );

        let mut frames: u64 = 0;
        while let Some(item) = input.next().await {
            let frame = item?;
            if output.has_failed() {
                frame.close();
                return Err(Error::Cancelled);
            }
            let result = encoder.encode(&frame).await;
            // release even when the encoder rejected it
            frame.close();
            result?;
            frames += 1;
        }

        encoder.flush().await?;
        if output.has_failed() {
            return Err(Error::Cancelled);
        }
        log::info!("encode stage finished: {} frames", frames);
        Ok(())
    }
}

impl Transform for EncodeStage {
    type Input = RawFrame;
    type Output = EncodedItem;

    fn pipe(self, input: ItemStream<RawFrame>) -> ItemStream<EncodedItem> {
        let (output, rx) = CodecOutput::channel("encode", PACKET_CHAN_CAP);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let err_output = output.clone();
            tokio::select! {
                result = self.run(input, output) => {
                    if let Err(e) = result {
                        log::warn!("encode stage aborted: {}", e);
                        err_output.error(e).await;
                    }
                }
                _ = cancel.cancelled() => {
                    err_output.error(Error::Cancelled).await;
                }
            }
        });
        Box::pin(into_stream(rx).flat_map(|item| stream::iter(expand(item))))
    }
}

/// A reported decoder config goes out ahead of the sample it came with.
fn expand(item: Result<EncodedOutput>) -> Vec<Result<EncodedItem>> {
    match item {
        Ok(EncodedOutput {
            sample,
            decoder_config,
        }) => {
            let mut items = Vec::with_capacity(2);
            if let Some(config) = decoder_config {
                items.push(Ok(EncodedItem::Config(config)));
            }
            items.push(Ok(EncodedItem::Sample(sample)));
            items
        }
        Err(e) => vec![Err(e)],
    }
}

#[cfg(test)]
#[path = "encoder_test.rs"]
mod encoder_test;
