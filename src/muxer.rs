//! One logical multi-track sink writing an outer clip with an embedded
//! inner clip.

use crate::container::{ClipOrigin, ContainerMuxer, SampleInfo, TrackInfo};
use crate::editor::{EditOptions, edit_track_types, merge_files};
use crate::error::{Error, Result};
use crate::format::{MAX_TRACKS_PER_CLIP, TrackFormat, TrackType};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tempfile::TempPath;

const TEMP_PREFIX: &str = "depth-tmp-";
const TEMP_SUFFIX: &str = ".mp4";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxerState {
    Initialized,
    Started,
    Stopped,
    Released,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergeStatus {
    Pending,
    Done,
    Failed,
}

/// Tracks whose format carries a track type go to the inner clip, all
/// others to the outer clip. Logical indices count up across both.
///
/// `stop` finishes both files, then edits the inner clip, edits the outer
/// clip and appends the inner clip to it, once. The caller is responsible
/// for sample ordering; see [`crate::interleave::SampleInterleaver`].
pub struct DepthMuxer<M> {
    outer: M,
    inner: M,
    outer_path: PathBuf,
    inner_path: PathBuf,
    /// Owns the temporary inner file; `None` when the clips stay separate.
    temp: Option<TempPath>,
    separate: bool,
    tracks: Vec<TrackInfo>,
    state: MuxerState,
    merge: MergeStatus,
    options: EditOptions,
}

impl<M: ContainerMuxer> DepthMuxer<M> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_options(path, EditOptions::default())
    }

    pub fn with_options(path: impl AsRef<Path>, options: EditOptions) -> Result<Self> {
        let temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(TEMP_SUFFIX)
            .tempfile()?
            .into_temp_path();
        let inner_path = temp.to_path_buf();
        let mut this = Self::open(path.as_ref(), &inner_path, options)?;
        this.temp = Some(temp);
        tracing::debug!(inner = %inner_path.display(), "temporary inner clip");
        Ok(this)
    }

    /// Write the outer and inner clips as two files and never merge them.
    /// The inner clip still gets its track-type metadata on `stop`.
    pub fn with_separate_files(outer: impl AsRef<Path>, inner: impl AsRef<Path>) -> Result<Self> {
        let mut this = Self::open(outer.as_ref(), inner.as_ref(), EditOptions::default())?;
        this.separate = true;
        Ok(this)
    }

    fn open(outer_path: &Path, inner_path: &Path, options: EditOptions) -> Result<Self> {
        Ok(DepthMuxer {
            outer: M::create(outer_path)?,
            inner: M::create(inner_path)?,
            outer_path: outer_path.to_path_buf(),
            inner_path: inner_path.to_path_buf(),
            temp: None,
            separate: false,
            tracks: Vec::new(),
            state: MuxerState::Initialized,
            merge: MergeStatus::Pending,
            options,
        })
    }

    pub fn state(&self) -> MuxerState {
        self.state
    }

    pub fn inner_path(&self) -> &Path {
        &self.inner_path
    }

    /// Returns the logical index of the new track.
    ///
    /// Fails with `InvalidState` when the container numbers the track other
    /// than consecutively. The container keeps that track while the logical
    /// table does not, so the muxer must be discarded after this error.
    pub fn add_track(&mut self, format: &TrackFormat) -> Result<usize> {
        if self.state != MuxerState::Initialized {
            return Err(Error::InvalidState("tracks must be added before start"));
        }
        let origin = if format.is_inner() { ClipOrigin::Inner } else { ClipOrigin::Outer };
        let in_clip = self.tracks.iter().filter(|t| t.origin == origin).count();
        if in_clip >= MAX_TRACKS_PER_CLIP {
            return Err(Error::TooManyTracks(in_clip + 1));
        }
        let physical = match origin {
            ClipOrigin::Outer => self.outer.add_track(format)?,
            ClipOrigin::Inner => self.inner.add_track(format)?,
        };
        // the track-type vector is positional
        if physical != in_clip {
            return Err(Error::InvalidState("container assigned an unexpected track index"));
        }
        let index = self.tracks.len();
        self.tracks.push(TrackInfo { index, origin, physical, format: format.clone() });
        tracing::debug!(index, ?origin, physical, mime = %format.mime, "track added");
        Ok(index)
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// The outer and inner physical muxers.
    pub fn containers(&self) -> (&M, &M) {
        (&self.outer, &self.inner)
    }

    pub fn track_info(&self, index: usize) -> Result<&TrackInfo> {
        self.tracks.get(index).ok_or(Error::UnknownTrack(index))
    }

    pub fn set_location(&mut self, latitude: f32, longitude: f32) -> Result<()> {
        self.outer.set_location(latitude, longitude)?;
        self.inner.set_location(latitude, longitude)?;
        Ok(())
    }

    pub fn set_orientation_hint(&mut self, degrees: u32) -> Result<()> {
        self.outer.set_orientation_hint(degrees)?;
        self.inner.set_orientation_hint(degrees)?;
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        if self.state != MuxerState::Initialized {
            return Err(Error::InvalidState("muxer already started"));
        }
        self.outer.start()?;
        self.inner.start()?;
        self.state = MuxerState::Started;
        Ok(())
    }

    /// Forward one sample, unchanged, to the container holding the track.
    pub fn write_sample_data(&mut self, index: usize, data: &[u8], info: &SampleInfo) -> Result<()> {
        if self.state != MuxerState::Started {
            return Err(Error::InvalidState("samples can only be written between start and stop"));
        }
        let track = self.tracks.get(index).ok_or(Error::UnknownTrack(index))?;
        let muxer = match track.origin {
            ClipOrigin::Outer => &mut self.outer,
            ClipOrigin::Inner => &mut self.inner,
        };
        muxer.write_sample_data(track.physical, data, info)?;
        Ok(())
    }

    /// Finish both files, then embed the inner clip into the outer one.
    /// Blocks until the merge has completed.
    pub fn stop(&mut self) -> Result<()> {
        if self.state != MuxerState::Started {
            return Err(Error::InvalidState("muxer is not started"));
        }
        self.outer.stop()?;
        self.inner.stop()?;
        self.state = MuxerState::Stopped;
        self.merge_if_needed()
    }

    /// Release both containers, merging first if `stop` has not.
    pub fn release(&mut self) -> Result<()> {
        if self.state == MuxerState::Released {
            return Ok(());
        }
        self.outer.release();
        self.inner.release();
        let stopped = self.state == MuxerState::Stopped;
        if !stopped && self.has_inner_tracks() {
            tracing::warn!("muxer released without stop, clips are left unmerged");
        }
        self.state = MuxerState::Released;
        if stopped { self.merge_if_needed() } else { Ok(()) }
    }

    fn has_inner_tracks(&self) -> bool {
        self.tracks.iter().any(|t| t.origin == ClipOrigin::Inner)
    }

    /// Track types of the inner tracks, by physical index.
    pub fn inner_track_types(&self) -> Vec<TrackType> {
        self.tracks
            .iter()
            .filter(|t| t.origin == ClipOrigin::Inner)
            .filter_map(|t| t.format.track_type)
            .collect()
    }

    fn merge_if_needed(&mut self) -> Result<()> {
        if self.merge != MergeStatus::Pending || !self.has_inner_tracks() {
            return Ok(());
        }
        let types = self.inner_track_types();
        let result = if self.separate {
            self.edit_inner_only(&types)
        } else {
            merge_files(&self.outer_path, &self.inner_path, &types, &self.options).map(|loc| {
                tracing::debug!(offset = loc.offset, length = loc.length, "clips merged");
            })
        };

        match result {
            Ok(()) => {
                self.merge = MergeStatus::Done;
                if let Some(temp) = self.temp.take() {
                    if let Err(e) = temp.close() {
                        tracing::warn!(error = %e, path = %self.inner_path.display(), "cannot remove temporary inner clip");
                    }
                }
                Ok(())
            }
            Err(e) => {
                self.merge = MergeStatus::Failed;
                if let Some(temp) = self.temp.take() {
                    match temp.keep() {
                        Ok(path) => tracing::warn!(path = %path.display(), "merge failed, inner clip kept"),
                        Err(e) => tracing::warn!(error = %e, "merge failed, inner clip lost"),
                    }
                }
                Err(e)
            }
        }
    }

    fn edit_inner_only(&self, types: &[TrackType]) -> Result<()> {
        let mut inner = OpenOptions::new().read(true).write(true).open(&self.inner_path)?;
        edit_track_types(&mut inner, types, &self.options)
    }
}

impl<M> Drop for DepthMuxer<M> {
    fn drop(&mut self) {
        let has_inner = self.tracks.iter().any(|t| t.origin == ClipOrigin::Inner);
        if has_inner && !self.separate && self.merge != MergeStatus::Done {
            tracing::warn!(outer = %self.outer_path.display(), "outer and inner clips were never merged");
        }
    }
}
