use std::pin::Pin;

use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{Error, Result};

/// Producer end of a stage.
pub type ItemStream<T> = Pin<Box<dyn Stream<Item = Result<T>> + Send>>;

/// Raw frames are large; keep only a couple in flight between stages.
pub const FRAME_CHAN_CAP: usize = 2;
/// Encoded samples and muxed chunks are small.
pub const PACKET_CHAN_CAP: usize = 16;

/// A stage with a consumer end and a producer end.
pub trait Transform {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Consumes `input` and returns the stage's output sequence.
    ///
    /// An `Err` item ends the sequence; the stage stops reading `input` after it.
    fn pipe(self, input: ItemStream<Self::Input>) -> ItemStream<Self::Output>;
}

pub fn into_stream<T: Send + 'static>(rx: mpsc::Receiver<Result<T>>) -> ItemStream<T> {
    Box::pin(ReceiverStream::new(rx))
}

/// Sends an item downstream; `false` once downstream is gone.
pub(crate) async fn forward<T>(tx: &mpsc::Sender<Result<T>>, item: Result<T>) -> bool {
    tx.send(item).await.is_ok()
}

/// Reports a stage failure downstream, ignoring a closed channel.
pub(crate) async fn fail<T>(tx: &mpsc::Sender<Result<T>>, stage: &str, err: Error) {
    if matches!(err, Error::Cancelled) {
        log::debug!("{}: cancelled", stage);
    } else {
        log::warn!("{} aborted: {}", stage, err);
    }
    let _ = tx.send(Err(err)).await;
}
