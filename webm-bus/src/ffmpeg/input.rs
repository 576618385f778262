use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use ffmpeg_next::{Rational, media, util::mathematics::Rescale};
use tokio::sync::mpsc;

use crate::{
    demux::{DemuxHandler, Demuxer, SourceFile},
    error::{Error, Result},
    sample::{ConfigRecord, EncodedSample, SampleKind},
    stage::PACKET_CHAN_CAP,
};

use super::TIME_BASE;

enum DemuxEvent {
    Config(ConfigRecord),
    Sample(EncodedSample),
}

/// Container demuxer backed by libavformat. Only the best video stream is read.
#[derive(Default)]
pub struct AvDemuxer;

#[async_trait]
impl Demuxer for AvDemuxer {
    async fn run(&mut self, source: &SourceFile, handler: &mut dyn DemuxHandler) -> Result<()> {
        let path = source.path().to_path_buf();
        let (tx, mut rx) = mpsc::channel(PACKET_CHAN_CAP);
        let reader = tokio::task::spawn_blocking(move || {
            if let Err(e) = read_packets(&path, &tx) {
                let _ = tx.blocking_send(Err(e));
            }
        });

        // returning early drops `rx`, which stops the reader at its next send
        while let Some(event) = rx.recv().await {
            match event? {
                DemuxEvent::Config(config) => handler.on_config(config).await?,
                DemuxEvent::Sample(sample) => handler.on_chunk(sample).await?,
            }
        }
        reader
            .await
            .map_err(|e| Error::codec("ffmpeg demuxer", e))?;
        Ok(())
    }
}

fn read_packets(path: &Path, tx: &mpsc::Sender<Result<DemuxEvent>>) -> Result<()> {
    let mut input = ffmpeg_next::format::input(path)
        .map_err(|e| Error::codec("ffmpeg demuxer", format!("{}: {}", path.display(), e)))?;

    let (index, time_base, config) = {
        let stream = input
            .streams()
            .best(media::Type::Video)
            .ok_or_else(|| Error::ConfigUnsupported(format!("{}: no video stream", path.display())))?;
        (stream.index(), stream.time_base(), config_record(&stream))
    };
    log::info!(
        "demuxing {}: stream {} {} {}x{}, time base {}",
        path.display(),
        index,
        config.codec,
        config.coded_width,
        config.coded_height,
        time_base
    );
    if tx.blocking_send(Ok(DemuxEvent::Config(config))).is_err() {
        return Ok(());
    }

    let mut packets: u64 = 0;
    for (stream, packet) in input.packets() {
        if stream.index() != index {
            continue;
        }
        let Some(ts) = packet.pts().or(packet.dts()) else {
            continue;
        };
        let kind = if packet.is_key() {
            SampleKind::Key
        } else {
            SampleKind::Delta
        };
        let data = packet.data().map(Bytes::copy_from_slice).unwrap_or_default();
        let mut sample = EncodedSample::new(data, to_micros(ts, time_base), kind);
        if packet.duration() > 0 {
            sample = sample.with_duration(to_micros(packet.duration(), time_base));
        }
        if tx.blocking_send(Ok(DemuxEvent::Sample(sample))).is_err() {
            log::debug!("demux reader stopped after {} packets", packets);
            return Ok(());
        }
        packets += 1;
    }
    log::info!("demuxed {}: {} packets", path.display(), packets);
    Ok(())
}

fn to_micros(value: i64, time_base: Rational) -> i64 {
    value.rescale(time_base, TIME_BASE)
}

fn config_record(stream: &ffmpeg_next::format::stream::Stream) -> ConfigRecord {
    let parameters = stream.parameters();
    let codec = parameters.id().name().to_string();
    unsafe {
        let ptr = parameters.as_ptr();
        let width = (*ptr).width.max(0) as u32;
        let height = (*ptr).height.max(0) as u32;
        let record = ConfigRecord::new(codec, width, height);
        let size = (*ptr).extradata_size;
        if (*ptr).extradata.is_null() || size <= 0 {
            return record;
        }
        let extradata = std::slice::from_raw_parts((*ptr).extradata, size as usize);
        record.with_description(Bytes::copy_from_slice(extradata))
    }
}
