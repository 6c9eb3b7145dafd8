//! Interface to the per-file container engines the depth façades drive.
//!
//! The depth muxer and extractor never parse samples themselves; they own
//! one engine per physical file and route logical tracks to them.

use crate::format::TrackFormat;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A contiguous span of bytes within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleFlags(pub u32);

impl SampleFlags {
    pub const SYNC: SampleFlags = SampleFlags(1);
    pub const CODEC_CONFIG: SampleFlags = SampleFlags(2);
    pub const END_OF_STREAM: SampleFlags = SampleFlags(4);

    pub fn contains(self, other: SampleFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for SampleFlags {
    type Output = SampleFlags;

    fn bitor(self, rhs: SampleFlags) -> SampleFlags {
        SampleFlags(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleInfo {
    pub presentation_time_us: i64,
    pub flags: SampleFlags,
}

impl SampleInfo {
    pub fn new(presentation_time_us: i64, flags: SampleFlags) -> Self {
        SampleInfo { presentation_time_us, flags }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SeekMode {
    #[default]
    PreviousSync,
    NextSync,
    ClosestSync,
}

/// Which physical file a logical track lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClipOrigin {
    Outer,
    Inner,
}

/// One logical track and where it physically lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub index: usize,
    pub origin: ClipOrigin,
    pub physical: usize,
    pub format: TrackFormat,
}

/// Writer for one physical MP4 file.
pub trait ContainerMuxer: Sized {
    fn create(path: &Path) -> anyhow::Result<Self>;

    /// Returns the physical track index, counted from 0 in call order.
    fn add_track(&mut self, format: &TrackFormat) -> anyhow::Result<usize>;
    fn start(&mut self) -> anyhow::Result<()>;
    fn write_sample_data(&mut self, track: usize, data: &[u8], info: &SampleInfo) -> anyhow::Result<()>;

    /// Finish the file; it must be complete on disk once this returns.
    fn stop(&mut self) -> anyhow::Result<()>;

    fn set_location(&mut self, _latitude: f32, _longitude: f32) -> anyhow::Result<()> {
        Ok(())
    }

    fn set_orientation_hint(&mut self, _degrees: u32) -> anyhow::Result<()> {
        Ok(())
    }

    fn release(&mut self) {}
}

/// Reader for one physical MP4 file, or an MP4 embedded in a byte range
/// of a larger file.
///
/// Sample accessors describe the next sample among the selected tracks and
/// return `None` once those are exhausted.
pub trait ContainerExtractor: Sized {
    fn open(path: &Path, range: Option<ByteRange>) -> anyhow::Result<Self>;

    fn track_count(&self) -> usize;
    fn track_format(&self, track: usize) -> anyhow::Result<TrackFormat>;
    fn select_track(&mut self, track: usize) -> anyhow::Result<()>;
    fn unselect_track(&mut self, track: usize) -> anyhow::Result<()>;
    fn seek_to(&mut self, time_us: i64, mode: SeekMode) -> anyhow::Result<()>;

    /// Step past the current sample; `false` when none remains.
    fn advance(&mut self) -> bool;

    fn sample_track_index(&self) -> Option<usize>;
    fn sample_time(&self) -> Option<i64>;
    fn sample_size(&self) -> Option<u64>;
    fn sample_flags(&self) -> Option<SampleFlags>;

    /// Replace the contents of `buf` with the current sample.
    fn read_sample_data(&mut self, buf: &mut Vec<u8>) -> anyhow::Result<Option<usize>>;

    fn release(&mut self) {}
}
