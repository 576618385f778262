use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::{
    error::Result,
    sample::{ConfigRecord, EncodedSample},
};

/// The uploaded file a run reads from.
#[derive(Clone, Debug)]
pub struct SourceFile {
    path: PathBuf,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

/// Receives what a demuxer extracts from the container.
#[async_trait]
pub trait DemuxHandler: Send {
    async fn on_config(&mut self, config: ConfigRecord) -> Result<()>;
    async fn on_chunk(&mut self, sample: EncodedSample) -> Result<()>;
}

/// Container parser. Calls `on_config` once, before any `on_chunk`.
#[async_trait]
pub trait Demuxer: Send {
    async fn run(&mut self, source: &SourceFile, handler: &mut dyn DemuxHandler) -> Result<()>;
}

/// Creates one demuxer per run.
pub trait DemuxerFactory: Send + Sync {
    fn create_demuxer(&self) -> Box<dyn Demuxer>;
}
