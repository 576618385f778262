use std::{
    any::Any,
    fmt::{Display, Formatter},
};

use bytes::Bytes;

/// Decoded picture storage owned by a codec backend.
///
/// Buffers come from a bounded pool (driver or codec owned), so whoever holds
/// the last [`RawFrame`] must hand the buffer back through [`FrameBuffer::release`].
pub trait FrameBuffer: Send + Sync {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    /// Presentation timestamp in microseconds.
    fn timestamp(&self) -> i64;
    /// Packed I420 copy of the picture, if the backend can produce one.
    fn to_i420(&self) -> Option<Bytes>;
    fn as_any(&self) -> &dyn Any;
    fn release(self: Box<Self>);
}

/// One decoded picture. Must be closed by its last consumer.
pub struct RawFrame {
    buffer: Option<Box<dyn FrameBuffer>>,
}

impl RawFrame {
    pub fn new(buffer: Box<dyn FrameBuffer>) -> Self {
        Self {
            buffer: Some(buffer),
        }
    }

    pub fn width(&self) -> u32 {
        self.buffer.as_ref().map(|b| b.width()).unwrap_or(0)
    }

    pub fn height(&self) -> u32 {
        self.buffer.as_ref().map(|b| b.height()).unwrap_or(0)
    }

    pub fn timestamp(&self) -> i64 {
        self.buffer.as_ref().map(|b| b.timestamp()).unwrap_or(0)
    }

    pub fn to_i420(&self) -> Option<Bytes> {
        self.buffer.as_ref().and_then(|b| b.to_i420())
    }

    /// Backend-specific view of the buffer, for encoders of the same backend.
    pub fn buffer<T: 'static>(&self) -> Option<&T> {
        self.buffer
            .as_ref()
            .and_then(|b| b.as_any().downcast_ref::<T>())
    }

    /// Returns the buffer to its pool.
    pub fn close(mut self) {
        if let Some(buffer) = self.buffer.take() {
            buffer.release();
        }
    }
}

impl Drop for RawFrame {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            log::warn!(
                "raw frame {}x{} @{} dropped without close",
                buffer.width(),
                buffer.height(),
                buffer.timestamp()
            );
            buffer.release();
        }
    }
}

impl Display for RawFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RawFrame {{ width: {}, height: {}, timestamp: {} }}",
            self.width(),
            self.height(),
            self.timestamp()
        )
    }
}
