use bytes::Bytes;

/// Decoder configuration multiplexed into an encoded sample sequence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigRecord {
    /// Codec name, e.g. "h264", "vp9".
    pub codec: String,
    pub coded_width: u32,
    pub coded_height: u32,
    /// Out-of-band codec data (avcC, CodecPrivate, ...).
    pub description: Option<Bytes>,
}

impl ConfigRecord {
    pub fn new(codec: impl Into<String>, coded_width: u32, coded_height: u32) -> Self {
        Self {
            codec: codec.into(),
            coded_width,
            coded_height,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<Bytes>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleKind {
    Key,
    Delta,
}

/// One compressed unit of video. Timestamps are in microseconds.
#[derive(Clone, Debug)]
pub struct EncodedSample {
    data: Bytes,
    timestamp: i64,
    duration: Option<i64>,
    kind: SampleKind,
}

impl EncodedSample {
    pub fn new(data: impl Into<Bytes>, timestamp: i64, kind: SampleKind) -> Self {
        Self {
            data: data.into(),
            timestamp,
            duration: None,
            kind,
        }
    }

    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn duration(&self) -> Option<i64> {
        self.duration
    }

    pub fn is_key(&self) -> bool {
        self.kind == SampleKind::Key
    }
}

/// Item of an encoded sequence: configuration records share the channel with samples.
#[derive(Clone, Debug)]
pub enum EncodedItem {
    Config(ConfigRecord),
    Sample(EncodedSample),
}

/// What an encoder capability hands back per output packet.
#[derive(Clone, Debug)]
pub struct EncodedOutput {
    pub sample: EncodedSample,
    /// Set when the encoder reports a new decoder configuration with this sample.
    pub decoder_config: Option<ConfigRecord>,
}

/// Byte chunk written by a muxer, tagged with its offset in the container.
#[derive(Clone, Debug)]
pub struct MuxedChunk {
    pub data: Bytes,
    pub position: u64,
}
