//! Transcode run orchestration.
//!
//! Data flow of one run:
//! ```text
//! SourceFile ─► DecodeStage ─► EncodeStage ─► RenderStage ─► MuxStage ─► SegmentBatcher ─► Uploader
//!   (demux)       RawFrame     Config+Sample  Sample          MuxedChunk    segments
//!                                                 │
//!                                                 └─► render decoder ─► RenderCallback
//! ```
//!
//! Stages are joined by bounded channels, so a slow upload throttles every
//! stage back to the file read.

use std::{
    fmt::{Display, Formatter},
    path::Path,
    sync::Arc,
};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{
    codec::{CodecFactory, EncoderConfig},
    decoder::DecodeStage,
    demux::{DemuxerFactory, SourceFile},
    encoder::EncodeStage,
    error::{Error, Result},
    mux::{MuxStage, MuxerFactory},
    render::{RenderCallback, RenderStage},
    stage::Transform,
    upload::{SEGMENT_THRESHOLD, SegmentBatcher, UploadSummary, Uploader},
};

/// Terminal notification of a run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Completion {
    Done { segments: u32, bytes: u64 },
    Error { message: String },
}

impl Completion {
    pub fn is_done(&self) -> bool {
        matches!(self, Completion::Done { .. })
    }
}

/// Called exactly once per run.
pub type CompletionCallback = Box<dyn FnOnce(Completion) + Send>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Configuring,
    Streaming,
    Completed,
    Failed,
}

impl Display for RunState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Configuring => "configuring",
            RunState::Streaming => "streaming",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// File name without directories and without its container extension.
pub fn base_name(name: &str) -> String {
    let file = name.rsplit(['/', '\\']).next().unwrap_or(name);
    Path::new(file)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.to_string())
}

/// Collaborators shared by every run of a [`Pipeline`].
#[derive(Clone)]
pub struct Collaborators {
    pub codecs: Arc<dyn CodecFactory>,
    pub demuxers: Arc<dyn DemuxerFactory>,
    pub muxers: Arc<dyn MuxerFactory>,
    pub uploader: Arc<dyn Uploader>,
}

/// Everything one run needs from its caller.
pub struct StartRequest {
    pub file: SourceFile,
    pub encoder_config: EncoderConfig,
    pub render_frame: RenderCallback,
    pub send_message: CompletionCallback,
}

/// Per run state; dropped when the run resolves.
struct PipelineContext {
    file: SourceFile,
    encoder_config: EncoderConfig,
    render_frame: RenderCallback,
    send_message: Option<CompletionCallback>,
    cancel: CancellationToken,
    state: RunState,
}

impl PipelineContext {
    fn transition(&mut self, next: RunState) {
        log::info!("run {}: {} -> {}", self.file.name(), self.state, next);
        self.state = next;
    }

    fn finish(&mut self, result: Result<UploadSummary>) -> RunState {
        let completion = match result {
            Ok(summary) => {
                self.transition(RunState::Completed);
                Completion::Done {
                    segments: summary.segments,
                    bytes: summary.bytes,
                }
            }
            Err(e) => {
                log::error!("run {} failed: {}", self.file.name(), e);
                // stop whatever stage is still running
                self.cancel.cancel();
                self.transition(RunState::Failed);
                Completion::Error {
                    message: e.to_string(),
                }
            }
        };
        if let Some(send_message) = self.send_message.take() {
            send_message(completion);
        }
        self.state
    }
}

/// Transcodes files to low resolution WebM and uploads them in segments.
pub struct Pipeline {
    collaborators: Collaborators,
    extension: String,
    threshold: usize,
}

impl Pipeline {
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            collaborators,
            extension: "webm".to_string(),
            threshold: SEGMENT_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub async fn start(&self, request: StartRequest) -> RunState {
        self.start_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Runs one transcode. Cancelling `cancel` aborts the run as failed.
    pub async fn start_with_cancel(
        &self,
        request: StartRequest,
        cancel: CancellationToken,
    ) -> RunState {
        let mut ctx = PipelineContext {
            file: request.file,
            encoder_config: request.encoder_config,
            render_frame: request.render_frame,
            send_message: Some(request.send_message),
            cancel: cancel.child_token(),
            state: RunState::Idle,
        };

        let result = self.run(&mut ctx).await;
        ctx.finish(result)
    }

    async fn run(&self, ctx: &mut PipelineContext) -> Result<UploadSummary> {
        let Collaborators {
            codecs,
            demuxers,
            muxers,
            uploader,
        } = &self.collaborators;
        let cancel = ctx.cancel.clone();

        ctx.transition(RunState::Configuring);
        let file_name = base_name(&ctx.file.name());
        let resolution = ctx.encoder_config.resolution();
        let encode = EncodeStage::configure(
            Arc::clone(codecs),
            ctx.encoder_config.clone(),
            cancel.clone(),
        )
        .await?;

        ctx.transition(RunState::Streaming);
        let frames = DecodeStage::new(
            Arc::clone(codecs),
            demuxers.create_demuxer(),
            cancel.clone(),
        )
        .open(ctx.file.clone());
        let encoded = encode.pipe(frames);
        let samples = RenderStage::new(
            Arc::clone(codecs),
            Arc::clone(&ctx.render_frame),
            cancel.clone(),
        )
        .pipe(encoded);
        let chunks = MuxStage::new(
            Arc::clone(muxers),
            ctx.encoder_config.clone(),
            cancel.clone(),
        )
        .pipe(samples);

        let batcher = SegmentBatcher::new(
            Arc::clone(uploader),
            file_name,
            resolution,
            self.extension.clone(),
        )
        .with_threshold(self.threshold);

        tokio::select! {
            result = batcher.drain(chunks) => result,
            _ = cancel.cancelled() => Err(Error::Cancelled),
        }
    }
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
