/// Registers FFmpeg components. Call once at startup before building the
/// FFmpeg-backed collaborators.
#[cfg(feature = "ffmpeg")]
pub fn init() -> error::Result<()> {
    ffmpeg_next::init().map_err(|e| error::Error::codec("ffmpeg init", e))
}

pub mod codec;
pub mod decoder;
pub mod demux;
pub mod encoder;
pub mod error;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod frame;
pub mod mux;
pub mod pipeline;
pub mod render;
pub mod sample;
pub mod stage;
pub mod upload;
pub mod webm;

#[cfg(test)]
mod testing;
