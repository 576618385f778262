use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;

use crate::{
    error::Result,
    sample::MuxedChunk,
    stage::ItemStream,
};

/// Cumulative size above which a segment is uploaded.
pub const SEGMENT_THRESHOLD: usize = 10_000_000;

/// Remote storage for finished segments.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload_file(&self, filename: &str, file_buffer: Bytes) -> Result<()>;
}

/// What a drained run uploaded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UploadSummary {
    pub segments: u32,
    pub bytes: u64,
}

/// Groups muxed chunks into upload-sized segments.
///
/// A chunk is never split: a segment is cut right after the chunk that pushed
/// it over the threshold.
pub struct SegmentBatcher {
    uploader: Arc<dyn Uploader>,
    base_name: String,
    resolution: String,
    extension: String,
    threshold: usize,
    chunks: Vec<Bytes>,
    byte_count: usize,
    summary: UploadSummary,
}

impl SegmentBatcher {
    pub fn new(
        uploader: Arc<dyn Uploader>,
        base_name: impl Into<String>,
        resolution: impl Into<String>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            uploader,
            base_name: base_name.into(),
            resolution: resolution.into(),
            extension: extension.into(),
            threshold: SEGMENT_THRESHOLD,
            chunks: Vec::new(),
            byte_count: 0,
            summary: UploadSummary::default(),
        }
    }

    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    /// `{base}-{resolution}.{index}.{extension}`, index starting at 1.
    pub fn segment_filename(&self, index: u32) -> String {
        format!(
            "{}-{}.{}.{}",
            self.base_name, self.resolution, index, self.extension
        )
    }

    pub fn pending_bytes(&self) -> usize {
        self.byte_count
    }

    pub fn summary(&self) -> UploadSummary {
        self.summary
    }

    pub async fn write(&mut self, chunk: Bytes) -> Result<()> {
        self.byte_count += chunk.len();
        self.chunks.push(chunk);
        if self.byte_count <= self.threshold {
            return Ok(());
        }
        self.trigger_upload().await
    }

    /// Uploads the remainder, if any.
    pub async fn close(&mut self) -> Result<()> {
        if self.chunks.is_empty() {
            return Ok(());
        }
        self.trigger_upload().await
    }

    async fn trigger_upload(&mut self) -> Result<()> {
        let file_buffer = if self.chunks.len() == 1 {
            self.chunks.remove(0)
        } else {
            let mut buf = BytesMut::with_capacity(self.byte_count);
            for chunk in &self.chunks {
                buf.extend_from_slice(chunk);
            }
            buf.freeze()
        };
        let size = file_buffer.len() as u64;
        let filename = self.segment_filename(self.summary.segments + 1);

        self.chunks.clear();
        self.byte_count = 0;

        log::info!("uploading segment {} ({} bytes)", filename, size);
        self.uploader.upload_file(&filename, file_buffer).await?;
        self.summary.segments += 1;
        self.summary.bytes += size;
        Ok(())
    }

    /// Consumes the muxed byte stream to its end and flushes the remainder.
    pub async fn drain(mut self, mut input: ItemStream<MuxedChunk>) -> Result<UploadSummary> {
        while let Some(item) = input.next().await {
            let chunk = item?;
            log::trace!(
                "muxed chunk @{}: {} bytes",
                chunk.position,
                chunk.data.len()
            );
            self.write(chunk.data).await?;
        }
        self.close().await?;
        Ok(self.summary)
    }
}

#[cfg(test)]
#[path = "upload_test.rs"]
mod upload_test;
