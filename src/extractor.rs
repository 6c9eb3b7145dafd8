//! One logical multi-track source over an outer clip and the inner clip
//! embedded in it.

use crate::container::{ClipOrigin, ContainerExtractor, SampleFlags, SeekMode, TrackInfo};
use crate::error::{Error, MetaError, Result};
use crate::format::{MAX_TRACKS_PER_CLIP, META_KEY_TRACK_TYPES, TrackType};
use crate::reader::{DepthClipInfo, probe_path, read_inner_clip_meta};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

struct Source<E> {
    engine: E,
    /// physical track index -> logical index
    logical: Vec<usize>,
    any_selected: bool,
}

impl<E: ContainerExtractor> Source<E> {
    fn new(engine: E) -> Self {
        Source { engine, logical: Vec::new(), any_selected: false }
    }

    /// Timestamp of the next sample, if any selected track has one.
    fn next_time(&self) -> Option<i64> {
        self.engine.sample_track_index()?;
        self.engine.sample_time()
    }
}

/// Tracks of the outer clip come first, then those of the inner clip, each
/// group in physical order. Inner tracks carry their track type in
/// `TrackFormat::track_type`.
///
/// Samples are served from whichever clip has the earlier next sample; on a
/// tie the outer clip goes first.
pub struct DepthExtractor<E> {
    outer: Source<E>,
    inner: Option<Source<E>>,
    tracks: Vec<TrackInfo>,
    selected: Vec<bool>,
    depth_info: Option<DepthClipInfo>,
    current: Option<ClipOrigin>,
}

impl<E: ContainerExtractor> DepthExtractor<E> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let depth_info = probe_path(path)?;
        let outer = E::open(path, None)?;
        let inner = match &depth_info {
            Some(info) => Some((E::open(path, Some(info.inner_clip_range()))?, info.inner_track_types.clone())),
            None => {
                tracing::debug!(path = %path.display(), "not a depth clip");
                None
            }
        };
        Self::build(outer, inner, depth_info)
    }

    /// Open an outer clip and its inner clip stored as separate files.
    pub fn from_separate_files(outer: impl AsRef<Path>, inner: impl AsRef<Path>) -> Result<Self> {
        let inner = inner.as_ref();
        let types = read_inner_clip_meta(BufReader::new(File::open(inner)?))?
            .ok_or(MetaError::MissingKey(META_KEY_TRACK_TYPES))?;
        let outer = E::open(outer.as_ref(), None)?;
        Self::build(outer, Some((E::open(inner, None)?, types)), None)
    }

    fn build(outer: E, inner: Option<(E, Vec<TrackType>)>, depth_info: Option<DepthClipInfo>) -> Result<Self> {
        let mut this = DepthExtractor {
            outer: Source::new(outer),
            inner: None,
            tracks: Vec::new(),
            selected: Vec::new(),
            depth_info,
            current: None,
        };
        this.outer.logical = this.register(ClipOrigin::Outer, None)?;
        if let Some((engine, types)) = inner {
            this.inner = Some(Source::new(engine));
            let logical = this.register(ClipOrigin::Inner, Some(&types))?;
            if let Some(inner) = this.inner.as_mut() {
                inner.logical = logical;
            }
        }
        tracing::debug!(tracks = this.tracks.len(), depth = this.inner.is_some(), "extractor opened");
        Ok(this)
    }

    fn register(&mut self, origin: ClipOrigin, types: Option<&[TrackType]>) -> Result<Vec<usize>> {
        let engine = &self.source(origin)?.engine;
        let count = engine.track_count();
        if count > MAX_TRACKS_PER_CLIP {
            return Err(Error::TooManyTracks(count));
        }
        if let Some(types) = types {
            if types.len() != count {
                return Err(MetaError::TrackCount { declared: types.len(), actual: count }.into());
            }
        }
        let mut infos = Vec::with_capacity(count);
        for physical in 0..count {
            let mut format = engine.track_format(physical)?;
            if let Some(types) = types {
                format.track_type = Some(types[physical]);
            }
            infos.push(TrackInfo { index: self.tracks.len() + physical, origin, physical, format });
        }
        let logical = infos.iter().map(|t| t.index).collect();
        self.selected.extend(std::iter::repeat_n(false, infos.len()));
        self.tracks.extend(infos);
        Ok(logical)
    }

    fn source(&self, origin: ClipOrigin) -> Result<&Source<E>> {
        match origin {
            ClipOrigin::Outer => Ok(&self.outer),
            ClipOrigin::Inner => self.inner.as_ref().ok_or(Error::InvalidState("no inner clip")),
        }
    }

    fn source_mut(&mut self, origin: ClipOrigin) -> Result<&mut Source<E>> {
        match origin {
            ClipOrigin::Outer => Ok(&mut self.outer),
            ClipOrigin::Inner => self.inner.as_mut().ok_or(Error::InvalidState("no inner clip")),
        }
    }

    pub fn is_depth_clip(&self) -> bool {
        self.inner.is_some()
    }

    pub fn depth_clip_info(&self) -> Option<&DepthClipInfo> {
        self.depth_info.as_ref()
    }

    pub fn inner_track_types(&self) -> Vec<TrackType> {
        self.tracks.iter().filter_map(|t| t.format.track_type).collect()
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn track_info(&self, index: usize) -> Result<&TrackInfo> {
        self.tracks.get(index).ok_or(Error::UnknownTrack(index))
    }

    pub fn track_format(&self, index: usize) -> Result<&crate::format::TrackFormat> {
        Ok(&self.track_info(index)?.format)
    }

    pub fn select_track(&mut self, index: usize) -> Result<()> {
        self.set_selected(index, true)
    }

    pub fn unselect_track(&mut self, index: usize) -> Result<()> {
        self.set_selected(index, false)
    }

    fn set_selected(&mut self, index: usize, selected: bool) -> Result<()> {
        let (origin, physical) = {
            let t = self.track_info(index)?;
            (t.origin, t.physical)
        };
        let any_selected = self
            .tracks
            .iter()
            .filter(|t| t.origin == origin)
            .any(|t| if t.index == index { selected } else { self.selected[t.index] });
        let source = self.source_mut(origin)?;
        if selected {
            source.engine.select_track(physical)?;
        } else {
            source.engine.unselect_track(physical)?;
        }
        source.any_selected = any_selected;
        self.selected[index] = selected;
        self.update_current();
        Ok(())
    }

    /// Seek every clip that has a selected track.
    ///
    /// The clips may land on different sync samples, so the first samples
    /// after a seek need not share a timestamp across clips.
    pub fn seek_to(&mut self, time_us: i64, mode: SeekMode) -> Result<()> {
        if self.outer.any_selected {
            self.outer.engine.seek_to(time_us, mode)?;
        }
        if let Some(inner) = self.inner.as_mut().filter(|s| s.any_selected) {
            inner.engine.seek_to(time_us, mode)?;
        }
        self.update_current();
        Ok(())
    }

    /// Step past the current sample. `false` once both clips are exhausted.
    pub fn advance(&mut self) -> bool {
        let Some(origin) = self.current else {
            return false;
        };
        if let Ok(source) = self.source_mut(origin) {
            source.engine.advance();
        }
        self.update_current();
        self.current.is_some()
    }

    fn update_current(&mut self) {
        // an exhausted clip never wins
        let outer = self.outer.next_time();
        let inner = self.inner.as_ref().filter(|s| s.any_selected).and_then(Source::next_time);
        self.current = match (outer, inner) {
            (_, None) => outer.map(|_| ClipOrigin::Outer),
            (None, Some(_)) => Some(ClipOrigin::Inner),
            (Some(o), Some(i)) if i >= o => Some(ClipOrigin::Outer),
            (Some(_), Some(_)) => Some(ClipOrigin::Inner),
        };
        tracing::trace!(current = ?self.current, ?outer, ?inner, "arbitrate");
    }

    fn current_source(&self) -> Option<&Source<E>> {
        self.current.and_then(|origin| self.source(origin).ok())
    }

    pub fn sample_track_index(&self) -> Option<usize> {
        let source = self.current_source()?;
        let physical = source.engine.sample_track_index()?;
        source.logical.get(physical).copied()
    }

    pub fn sample_time(&self) -> Option<i64> {
        self.current_source()?.engine.sample_time()
    }

    pub fn sample_size(&self) -> Option<u64> {
        self.current_source()?.engine.sample_size()
    }

    pub fn sample_flags(&self) -> Option<SampleFlags> {
        self.current_source()?.engine.sample_flags()
    }

    pub fn read_sample_data(&mut self, buf: &mut Vec<u8>) -> Result<Option<usize>> {
        let Some(origin) = self.current else {
            return Ok(None);
        };
        Ok(self.source_mut(origin)?.engine.read_sample_data(buf)?)
    }

    pub fn release(&mut self) {
        self.outer.engine.release();
        if let Some(inner) = self.inner.as_mut() {
            inner.engine.release();
        }
        self.current = None;
    }
}
