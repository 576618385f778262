use ffmpeg_next::{
    format::Pixel,
    frame::Video,
    software::scaling::{Context, flag::Flags},
};

use crate::error::{Error, Result};

/// Software scaler that rebuilds its context when the source geometry changes.
pub struct Scaler {
    context: Option<(Context, (Pixel, u32, u32))>,
    format: Pixel,
    width: u32,
    height: u32,
}

unsafe impl Send for Scaler {}

impl Scaler {
    pub fn new(format: Pixel, width: u32, height: u32) -> Self {
        Self {
            context: None,
            format,
            width,
            height,
        }
    }

    pub fn run(&mut self, src: &Video) -> Result<Video> {
        let source = (src.format(), src.width(), src.height());
        let stale = match &self.context {
            Some((_, current)) => *current != source,
            None => true,
        };
        if stale {
            log::debug!(
                "scaler {:?} {}x{} -> {:?} {}x{}",
                source.0,
                source.1,
                source.2,
                self.format,
                self.width,
                self.height
            );
            let context = Context::get(
                source.0,
                source.1,
                source.2,
                self.format,
                self.width,
                self.height,
                Flags::BILINEAR,
            )
            .map_err(|e| Error::codec("scaler", e))?;
            self.context = Some((context, source));
        }

        let mut dst = Video::empty();
        if let Some((context, _)) = self.context.as_mut() {
            context
                .run(src, &mut dst)
                .map_err(|e| Error::codec("scaler", e))?;
        }
        dst.set_pts(src.pts());
        Ok(dst)
    }
}
