//! Writer-side ordering of samples from asynchronous producers.
//!
//! Samples arrive per track, in order within a track. A sample may be
//! written only once every track that has not reached end of stream has at
//! least one pending sample, because an empty live track might still
//! produce an earlier timestamp.

use crate::container::{ContainerMuxer, SampleInfo};
use crate::error::{Error, Result};
use crate::muxer::DepthMuxer;
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq)]
pub struct PendingSample {
    pub track: usize,
    pub data: Vec<u8>,
    pub info: SampleInfo,
}

#[derive(Debug, Default)]
struct TrackQueue {
    pending: VecDeque<PendingSample>,
    eos: bool,
    last_time_us: Option<i64>,
}

#[derive(Debug, Default)]
pub struct SampleInterleaver {
    tracks: Vec<TrackQueue>,
}

impl SampleInterleaver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interleaver over tracks `0..count`, matching logical muxer indices.
    pub fn with_tracks(count: usize) -> Self {
        SampleInterleaver { tracks: (0..count).map(|_| TrackQueue::default()).collect() }
    }

    pub fn add_track(&mut self) -> usize {
        self.tracks.push(TrackQueue::default());
        self.tracks.len() - 1
    }

    pub fn push(&mut self, track: usize, data: Vec<u8>, info: SampleInfo) -> Result<()> {
        let queue = self.tracks.get_mut(track).ok_or(Error::UnknownTrack(track))?;
        if queue.eos {
            return Err(Error::InvalidState("sample pushed after end of stream"));
        }
        let time_us = info.presentation_time_us;
        if let Some(previous_us) = queue.last_time_us.filter(|&p| time_us < p) {
            return Err(Error::NonMonotonic { track, time_us, previous_us });
        }
        queue.last_time_us = Some(time_us);
        queue.pending.push_back(PendingSample { track, data, info });
        Ok(())
    }

    pub fn mark_eos(&mut self, track: usize) -> Result<()> {
        let queue = self.tracks.get_mut(track).ok_or(Error::UnknownTrack(track))?;
        queue.eos = true;
        Ok(())
    }

    /// The pending sample with the smallest timestamp, or `None` when some
    /// live track has nothing queued or everything is drained. Ties go to
    /// the lower track index.
    pub fn pop_next(&mut self) -> Option<PendingSample> {
        let mut next: Option<(usize, i64)> = None;
        for (index, queue) in self.tracks.iter().enumerate() {
            let Some(head) = queue.pending.front() else {
                if queue.eos {
                    continue;
                }
                tracing::trace!(track = index, "waiting for track");
                return None;
            };
            let t = head.info.presentation_time_us;
            if next.is_none_or(|(_, best)| t < best) {
                next = Some((index, t));
            }
        }
        let (index, _) = next?;
        self.tracks[index].pending.pop_front()
    }

    /// Every track reached end of stream and nothing is pending.
    pub fn is_finished(&self) -> bool {
        self.tracks.iter().all(|q| q.eos && q.pending.is_empty())
    }

    pub fn pending(&self) -> usize {
        self.tracks.iter().map(|q| q.pending.len()).sum()
    }

    /// Write every sample whose turn can already be decided.
    pub fn drain_into<M: ContainerMuxer>(&mut self, muxer: &mut DepthMuxer<M>) -> Result<usize> {
        let mut written = 0;
        while let Some(s) = self.pop_next() {
            muxer.write_sample_data(s.track, &s.data, &s.info)?;
            written += 1;
        }
        Ok(written)
    }
}
