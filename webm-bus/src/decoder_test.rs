use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::decoder::DecodeStage;
use crate::demux::{DemuxerFactory, SourceFile};
use crate::error::Error;
use crate::frame::RawFrame;
use crate::stage::ItemStream;
use crate::testing::{FRAME_DURATION_US, MockCodecs, MockDemuxerFactory, collect};

fn open(codecs: &Arc<MockCodecs>, demuxers: &MockDemuxerFactory) -> ItemStream<RawFrame> {
    DecodeStage::new(
        codecs.clone(),
        demuxers.create_demuxer(),
        CancellationToken::new(),
    )
    .open(SourceFile::new("clips/input.mp4"))
}

#[tokio::test]
async fn test_decode_frames_in_order() -> anyhow::Result<()> {
    let codecs = Arc::new(MockCodecs::new());
    let demuxers = MockDemuxerFactory::new(5);

    let (frames, err) = collect(open(&codecs, &demuxers)).await;
    assert!(err.is_none(), "unexpected error: {:?}", err);
    assert_eq!(frames.len(), 5);
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.timestamp(), i as i64 * FRAME_DURATION_US);
        assert_eq!((frame.width(), frame.height()), (1280, 720));
    }

    // configure happens once, before the first decode
    let events = codecs.events();
    assert_eq!(events[0], "configure h264");
    assert_eq!(events.iter().filter(|e| e.starts_with("configure")).count(), 1);

    for frame in frames {
        frame.close();
    }
    assert_eq!(codecs.pool.created(), 5);
    assert_eq!(codecs.pool.released(), 5);
    Ok(())
}

#[tokio::test]
async fn test_sample_before_config() -> anyhow::Result<()> {
    let codecs = Arc::new(MockCodecs::new());
    let mut demuxers = MockDemuxerFactory::new(3);
    demuxers.configs = 0;

    let (frames, err) = collect(open(&codecs, &demuxers)).await;
    assert!(frames.is_empty());
    assert!(matches!(err, Some(Error::ProtocolViolation(_))));
    assert_eq!(demuxers.emitted(), 0);
    Ok(())
}

#[tokio::test]
async fn test_second_config_rejected() -> anyhow::Result<()> {
    let codecs = Arc::new(MockCodecs::new());
    let mut demuxers = MockDemuxerFactory::new(3);
    demuxers.configs = 2;

    let (frames, err) = collect(open(&codecs, &demuxers)).await;
    assert!(frames.is_empty());
    assert!(matches!(err, Some(Error::ProtocolViolation(_))));
    Ok(())
}

#[tokio::test]
async fn test_unsupported_decoder_config() -> anyhow::Result<()> {
    let codecs = Arc::new(MockCodecs::new());
    let mut demuxers = MockDemuxerFactory::new(3);
    demuxers.codec = "unsupported".to_string();

    let (frames, err) = collect(open(&codecs, &demuxers)).await;
    assert!(frames.is_empty());
    assert!(matches!(err, Some(Error::ConfigUnsupported(_))));
    assert!(codecs.events().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_codec_fault_stops_demux() -> anyhow::Result<()> {
    let mut codecs = MockCodecs::new();
    codecs.fail_decode_at = Some(("h264".to_string(), 2));
    let codecs = Arc::new(codecs);
    let demuxers = MockDemuxerFactory::new(100);

    // read to the end so the stage task is done before counting
    let items: Vec<_> = open(&codecs, &demuxers).collect().await;
    let first_err = items.iter().position(|item| item.is_err());
    assert_eq!(first_err, Some(2));
    assert!(matches!(items[2], Err(Error::CodecFault { .. })));
    // nothing is read past the faulting sample
    assert_eq!(demuxers.emitted(), 3);

    for frame in items.into_iter().flatten() {
        frame.close();
    }
    assert_eq!(codecs.pool.created(), codecs.pool.released());
    Ok(())
}

#[tokio::test]
async fn test_cancel_ends_stream() -> anyhow::Result<()> {
    let codecs = Arc::new(MockCodecs::new());
    let demuxers = MockDemuxerFactory::new(1_000);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let stream = DecodeStage::new(codecs.clone(), demuxers.create_demuxer(), cancel)
        .open(SourceFile::new("clips/input.mp4"));
    let (frames, err) = collect(stream).await;
    assert!(matches!(err, Some(Error::Cancelled)));
    assert!(frames.len() < 1_000);
    Ok(())
}
