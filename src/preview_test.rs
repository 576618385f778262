use std::{
    any::Any,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use webm_bus::frame::{FrameBuffer, RawFrame};

use crate::preview::{Preview, encode_jpeg, i420_to_rgb};

struct GrayFrame {
    released: Arc<AtomicUsize>,
    timestamp: i64,
}

impl FrameBuffer for GrayFrame {
    fn width(&self) -> u32 {
        16
    }

    fn height(&self) -> u32 {
        8
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn to_i420(&self) -> Option<Bytes> {
        Some(Bytes::from(vec![128u8; 16 * 8 * 3 / 2]))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn release(self: Box<Self>) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_i420_to_rgb_gray() -> anyhow::Result<()> {
    let rgb = i420_to_rgb(&[128u8; 4 * 2 * 3 / 2], 4, 2)?;
    assert_eq!(rgb.len(), 4 * 2 * 3);
    assert!(rgb.iter().all(|v| *v == 128));
    Ok(())
}

#[test]
fn test_i420_short_buffer() {
    assert!(i420_to_rgb(&[0u8; 10], 16, 16).is_err());
}

#[test]
fn test_encode_jpeg() -> anyhow::Result<()> {
    let jpeg = encode_jpeg(&[128u8; 16 * 8 * 3 / 2], 16, 8)?;
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
    Ok(())
}

#[test]
fn test_encode_jpeg_rejects_oversized_frame() {
    let err = encode_jpeg(&[], 70_000, 2).unwrap_err();
    assert!(err.to_string().contains("70000x2"), "{}", err);
    assert!(encode_jpeg(&[], 2, 65_536).is_err());
}

#[tokio::test]
async fn test_callback_closes_and_samples_frames() -> anyhow::Result<()> {
    let dir = std::env::temp_dir().join(format!("lowres-preview-{}", std::process::id()));
    tokio::fs::create_dir_all(&dir).await?;

    let released = Arc::new(AtomicUsize::new(0));
    let preview = Preview::new("video", Some(dir.clone()), 2);
    let render = preview.callback();
    for i in 0..5 {
        render(RawFrame::new(Box::new(GrayFrame {
            released: released.clone(),
            timestamp: i * 33_333,
        })));
    }
    assert_eq!(preview.frames(), 5);
    assert_eq!(released.load(Ordering::SeqCst), 5);

    // frames 0, 2 and 4 are written in the background
    let expected: Vec<_> = [0, 2, 4]
        .iter()
        .map(|i| dir.join(format!("video-{:06}.jpg", i)))
        .collect();
    for _ in 0..100 {
        if expected.iter().all(|p| p.exists()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(expected.iter().all(|p| p.exists()));
    assert!(!dir.join("video-000001.jpg").exists());

    tokio::fs::remove_dir_all(&dir).await?;
    Ok(())
}

#[tokio::test]
async fn test_callback_without_dir_only_counts() {
    let released = Arc::new(AtomicUsize::new(0));
    let preview = Preview::new("video", None, 1);
    let render = preview.callback();
    for i in 0..3 {
        render(RawFrame::new(Box::new(GrayFrame {
            released: released.clone(),
            timestamp: i,
        })));
    }
    assert_eq!(preview.frames(), 3);
    assert_eq!(released.load(Ordering::SeqCst), 3);
}
