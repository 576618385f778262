use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures that end a transcode run.
#[derive(Error, Debug)]
pub enum Error {
    /// Target configuration rejected before any work started.
    #[error("config not supported: {0}")]
    ConfigUnsupported(String),

    /// A codec engine or the muxer reported an internal error.
    #[error("codec fault in {stage}: {message}")]
    CodecFault { stage: &'static str, message: String },

    /// A sample arrived before the configuration it depends on.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The upload collaborator rejected a segment.
    #[error("upload of {filename} failed: {message}")]
    UploadFailure { filename: String, message: String },

    #[error("run cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn codec(stage: &'static str, message: impl ToString) -> Self {
        Self::CodecFault {
            stage,
            message: message.to_string(),
        }
    }

    pub fn upload(filename: &str, message: impl ToString) -> Self {
        Self::UploadFailure {
            filename: filename.to_string(),
            message: message.to_string(),
        }
    }
}
