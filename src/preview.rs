use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use jpeg_encoder::{ColorType, Encoder};
use webm_bus::{frame::RawFrame, render::RenderCallback};

/// Render sink for the re-decoded low resolution frames.
///
/// Every frame is counted and closed; with a preview directory every
/// `interval`-th frame is also written there as a JPEG.
pub struct Preview {
    base_name: String,
    dir: Option<PathBuf>,
    interval: u64,
    frames: AtomicU64,
}

impl Preview {
    pub fn new(base_name: impl Into<String>, dir: Option<PathBuf>, interval: u64) -> Arc<Self> {
        Arc::new(Self {
            base_name: base_name.into(),
            dir,
            interval: interval.max(1),
            frames: AtomicU64::new(0),
        })
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn callback(self: &Arc<Self>) -> RenderCallback {
        let preview = Arc::clone(self);
        Arc::new(move |frame: RawFrame| preview.render(frame))
    }

    fn render(&self, frame: RawFrame) {
        let index = self.frames.fetch_add(1, Ordering::Relaxed);
        let snapshot = match &self.dir {
            Some(dir) if index % self.interval == 0 => frame.to_i420().map(|data| {
                let path = dir.join(format!("{}-{:06}.jpg", self.base_name, index));
                (data, frame.width(), frame.height(), path)
            }),
            _ => None,
        };
        frame.close();

        if let Some((data, width, height, path)) = snapshot {
            tokio::task::spawn_blocking(move || {
                if let Err(e) = write_jpeg(&path, &data, width, height) {
                    log::warn!("preview {} not written: {}", path.display(), e);
                }
            });
        }
    }
}

fn write_jpeg(path: &Path, i420: &[u8], width: u32, height: u32) -> anyhow::Result<()> {
    let jpeg = encode_jpeg(i420, width, height)?;
    std::fs::write(path, jpeg)?;
    Ok(())
}

pub fn encode_jpeg(i420: &[u8], width: u32, height: u32) -> anyhow::Result<Vec<u8>> {
    let (Ok(jpeg_width), Ok(jpeg_height)) = (u16::try_from(width), u16::try_from(height)) else {
        anyhow::bail!("{}x{} is too large for a jpeg preview", width, height);
    };
    let rgb = i420_to_rgb(i420, width, height)?;
    let mut jpeg = Vec::new();
    Encoder::new(&mut jpeg, 80).encode(&rgb, jpeg_width, jpeg_height, ColorType::Rgb)?;
    Ok(jpeg)
}

/// Packed I420 to RGB24 (BT.601).
pub fn i420_to_rgb(data: &[u8], width: u32, height: u32) -> anyhow::Result<Vec<u8>> {
    let width = width as usize;
    let height = height as usize;
    let uv_width = width.div_ceil(2);
    let uv_height = height.div_ceil(2);
    let y_size = width * height;
    let uv_size = uv_width * uv_height;
    if data.len() < y_size + uv_size * 2 {
        anyhow::bail!(
            "i420 buffer too short for {}x{}: {} bytes",
            width,
            height,
            data.len()
        );
    }

    let y_plane = &data[..y_size];
    let u_plane = &data[y_size..y_size + uv_size];
    let v_plane = &data[y_size + uv_size..y_size + uv_size * 2];

    let mut rgb = Vec::with_capacity(y_size * 3);
    for j in 0..height {
        for i in 0..width {
            let uv_idx = (j / 2) * uv_width + (i / 2);
            let y = y_plane[j * width + i] as f32;
            let u = u_plane[uv_idx] as f32 - 128.0;
            let v = v_plane[uv_idx] as f32 - 128.0;

            rgb.push((y + 1.402 * v).clamp(0.0, 255.0) as u8);
            rgb.push((y - 0.344136 * u - 0.714136 * v).clamp(0.0, 255.0) as u8);
            rgb.push((y + 1.772 * u).clamp(0.0, 255.0) as u8);
        }
    }
    Ok(rgb)
}

#[cfg(test)]
#[path = "preview_test.rs"]
mod preview_test;
