use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    codec::{CodecFactory, CodecOutput, VideoDecoder},
    error::{Error, Result},
    frame::RawFrame,
    sample::{EncodedItem, EncodedSample},
    stage::{self, FRAME_CHAN_CAP, ItemStream, PACKET_CHAN_CAP, Transform, into_stream},
};

/// Receives every frame decoded for preview. The callee owns the frame and must close it.
pub type RenderCallback = Arc<dyn Fn(RawFrame) + Send + Sync>;

/// Decodes the re-encoded samples for preview and passes the samples on unchanged.
///
/// Config records only reconfigure the preview decoder; the muxer is set up from
/// the encoder config and never sees them.
pub struct RenderStage {
    codecs: Arc<dyn CodecFactory>,
    render: RenderCallback,
    cancel: CancellationToken,
}

impl RenderStage {
    pub fn new(
        codecs: Arc<dyn CodecFactory>,
        render: RenderCallback,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            codecs,
            render,
            cancel,
        }
    }

    async fn run(
        self,
        mut input: ItemStream<EncodedItem>,
        tx: mpsc::Sender<Result<EncodedSample>>,
    ) -> Result<()> {
        let (frames_out, mut frames_rx) = CodecOutput::channel("render", FRAME_CHAN_CAP);
        let mut decoder = self.codecs.create_decoder(frames_out.clone())?;

        let render = Arc::clone(&self.render);
        let err_tx = tx.clone();
        let drain = tokio::spawn(async move {
            let mut rendered: u64 = 0;
            while let Some(item) = frames_rx.recv().await {
                match item {
                    Ok(frame) => {
                        render(frame);
                        rendered += 1;
                    }
                    Err(e) => {
                        stage::fail(&err_tx, "render decoder", e).await;
                        break;
                    }
                }
            }
            rendered
        });

        let fed = feed(&mut input, &tx, decoder.as_mut(), &frames_out).await;
        let failed = frames_out.has_failed();
        drop(decoder);
        drop(frames_out);

        // a dead render task is the cause of whatever the feed loop saw after it
        let rendered = match drain.await {
            Ok(rendered) => rendered,
            Err(e) => return Err(Error::codec("render callback", e)),
        };
        let samples = fed?;
        // the drain task already forwarded the decoder's own error
        if failed {
            return Err(Error::Cancelled);
        }
        log::info!(
            "render stage finished: {} samples, {} frames rendered",
            samples,
            rendered
        );
        Ok(())
    }
}

/// Forwards samples downstream and feeds the preview decoder. Returns the sample count.
async fn feed(
    input: &mut ItemStream<EncodedItem>,
    tx: &mpsc::Sender<Result<EncodedSample>>,
    decoder: &mut dyn VideoDecoder,
    frames_out: &CodecOutput<RawFrame>,
) -> Result<u64> {
    let mut configured = false;
    let mut samples: u64 = 0;
    while let Some(item) = input.next().await {
        match item? {
            EncodedItem::Config(config) => {
                log::debug!(
                    "render decoder config: {} {}x{}",
                    config.codec,
                    config.coded_width,
                    config.coded_height
                );
                decoder.configure(&config).await?;
                configured = true;
            }
            EncodedItem::Sample(sample) => {
                if !configured {
                    return Err(Error::ProtocolViolation(format!(
                        "encoded sample @{} before its config",
                        sample.timestamp()
                    )));
                }
                if frames_out.has_failed() {
                    return Ok(samples);
                }
                decoder.decode(&sample).await?;
                if !stage::forward(tx, Ok(sample)).await {
                    return Err(Error::Cancelled);
                }
                samples += 1;
            }
        }
    }
    if !frames_out.has_failed() {
        decoder.flush().await?;
    }
    Ok(samples)
}

impl Transform for RenderStage {
    type Input = EncodedItem;
    type Output = EncodedSample;

    fn pipe(self, input: ItemStream<EncodedItem>) -> ItemStream<EncodedSample> {
        let (tx, rx) = mpsc::channel(PACKET_CHAN_CAP);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = self.run(input, tx.clone()) => {
                    if let Err(e) = result {
                        stage::fail(&tx, "render stage", e).await;
                    }
                }
                _ = cancel.cancelled() => {
                    stage::fail(&tx, "render stage", Error::Cancelled).await;
                }
            }
        });
        into_stream(rx)
    }
}

#[cfg(test)]
#[path = "render_test.rs"]
mod render_test;
