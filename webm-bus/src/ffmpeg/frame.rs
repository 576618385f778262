use std::any::Any;

use bytes::{BufMut, Bytes, BytesMut};
use ffmpeg_next::{format::Pixel, frame::Video};

use crate::frame::FrameBuffer;

use super::scaler::Scaler;

/// A decoded FFmpeg picture. Releasing it unrefs the codec's buffer.
pub struct AvFrameBuffer {
    frame: Video,
    timestamp: i64,
}

impl AvFrameBuffer {
    pub fn new(frame: Video, timestamp: i64) -> Self {
        Self { frame, timestamp }
    }

    pub fn frame(&self) -> &Video {
        &self.frame
    }
}

impl FrameBuffer for AvFrameBuffer {
    fn width(&self) -> u32 {
        self.frame.width()
    }

    fn height(&self) -> u32 {
        self.frame.height()
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn to_i420(&self) -> Option<Bytes> {
        if self.frame.format() == Pixel::YUV420P {
            return Some(pack_planes(&self.frame));
        }
        let mut scaler = Scaler::new(Pixel::YUV420P, self.frame.width(), self.frame.height());
        match scaler.run(&self.frame) {
            Ok(converted) => Some(pack_planes(&converted)),
            Err(e) => {
                log::warn!("i420 conversion failed: {}", e);
                None
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn release(self: Box<Self>) {}
}

/// Copies the three planes of a YUV420P frame without row padding.
fn pack_planes(frame: &Video) -> Bytes {
    let mut buf = BytesMut::with_capacity(
        (frame.width() * frame.height()) as usize * 3 / 2,
    );
    for plane in 0..3 {
        let width = frame.plane_width(plane) as usize;
        let height = frame.plane_height(plane) as usize;
        let stride = frame.stride(plane);
        let data = frame.data(plane);
        for row in 0..height {
            let start = row * stride;
            buf.put_slice(&data[start..start + width]);
        }
    }
    buf.freeze()
}

/// Builds a YUV420P frame from packed I420 bytes.
pub fn from_i420(data: &[u8], width: u32, height: u32) -> Option<Video> {
    let mut frame = Video::new(Pixel::YUV420P, width, height);
    let mut offset = 0;
    for plane in 0..3 {
        let plane_width = frame.plane_width(plane) as usize;
        let plane_height = frame.plane_height(plane) as usize;
        let stride = frame.stride(plane);
        if data.len() < offset + plane_width * plane_height {
            return None;
        }
        let dst = frame.data_mut(plane);
        for row in 0..plane_height {
            let src = &data[offset + row * plane_width..offset + (row + 1) * plane_width];
            dst[row * stride..row * stride + plane_width].copy_from_slice(src);
        }
        offset += plane_width * plane_height;
    }
    Some(frame)
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod frame_test;
