#![allow(dead_code)]

//! A minimal MP4 writer and reader used as the per-file container engine in
//! tests. Each track is a `trak` holding its format as JSON in an `fmt `
//! box and its sample table in an `smpl` box; sample bytes go to `mdat`.

use anyhow::{Context, bail, ensure};
use mp4depth::boxes::{BoxBuilder, FourCC, Mp4Box};
use mp4depth::container::{ByteRange, ContainerExtractor, ContainerMuxer, SampleFlags, SampleInfo, SeekMode};
use mp4depth::format::TrackFormat;
use mp4depth::parser::BoxParser;
use mp4depth::tree::{ParseRule, TreeParser};
use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const FTYP: FourCC = FourCC(*b"ftyp");
pub const TRAK: FourCC = FourCC(*b"trak");
pub const FMT: FourCC = FourCC(*b"fmt ");
pub const SMPL: FourCC = FourCC(*b"smpl");

/// Padding left after `moov` by a freshly written clip.
pub const DEFAULT_FREE_SIZE: u64 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// ftyp, moov, free(n), mdat
    MoovBeforeFree(u64),
    /// ftyp, mdat, moov
    MoovAtEnd,
    /// ftyp, mdat
    NoMoov,
}

impl Default for Layout {
    fn default() -> Self {
        Layout::MoovBeforeFree(DEFAULT_FREE_SIZE)
    }
}

#[derive(Debug, Clone)]
pub struct Sample {
    pub data: Vec<u8>,
    pub info: SampleInfo,
}

#[derive(Debug, Clone)]
pub struct FixtureTrack {
    pub format: TrackFormat,
    pub samples: Vec<Sample>,
}

impl FixtureTrack {
    pub fn new(format: TrackFormat, samples: Vec<Sample>) -> Self {
        FixtureTrack { format, samples }
    }
}

/// `count` samples spaced `frame_us` apart; every `sync_every`-th is a sync
/// sample. Payloads are tagged so mixed-up tracks show up in comparisons.
pub fn synthetic_samples(count: usize, frame_us: i64, sync_every: usize, tag: u8) -> Vec<Sample> {
    (0..count)
        .map(|i| {
            let flags = if i % sync_every == 0 { SampleFlags::SYNC } else { SampleFlags::default() };
            let mut data = vec![tag; 8 + i % 7];
            data[..4].copy_from_slice(&(i as u32).to_be_bytes());
            Sample { data, info: SampleInfo::new(i as i64 * frame_us, flags) }
        })
        .collect()
}

fn build_moov(tracks: &[FixtureTrack], mdat_payload_start: u64) -> anyhow::Result<Mp4Box> {
    let mut moov = BoxBuilder::new(FourCC::MOOV);
    let mut offset = mdat_payload_start;
    for t in tracks {
        let fmt = BoxBuilder::new(FMT).put_bytes(&serde_json::to_vec(&t.format)?).build();
        let mut smpl = BoxBuilder::new(SMPL).put_u32(t.samples.len() as u32);
        for s in &t.samples {
            smpl = smpl
                .put_u64(offset)
                .put_u32(s.data.len() as u32)
                .put_u64(s.info.presentation_time_us as u64)
                .put_u32(s.info.flags.0);
            offset += s.data.len() as u64;
        }
        let trak = BoxBuilder::new(TRAK).put_box(&fmt).put_box(&smpl.build()).build();
        moov = moov.put_box(&trak);
    }
    Ok(moov.build())
}

/// Serialize a whole clip.
pub fn clip_bytes(tracks: &[FixtureTrack], layout: Layout) -> anyhow::Result<Vec<u8>> {
    let ftyp = BoxBuilder::new(FTYP).put_fourcc(FourCC(*b"isom")).put_u32(0).put_fourcc(FourCC(*b"isom")).build();
    let mut mdat_payload = Vec::new();
    for t in tracks {
        for s in &t.samples {
            mdat_payload.extend_from_slice(&s.data);
        }
    }
    let mdat = Mp4Box::with_payload(FourCC::MDAT, mdat_payload);

    // offsets in the sample table do not change the moov size
    let moov_size = build_moov(tracks, 0)?.size();
    let mut out = Vec::new();
    ftyp.write_to(&mut out)?;
    match layout {
        Layout::MoovBeforeFree(free_size) => {
            let mdat_start = ftyp.size() + moov_size + free_size;
            build_moov(tracks, mdat_start + 8)?.write_to(&mut out)?;
            Mp4Box::with_payload(FourCC::FREE, vec![0; free_size as usize - 8]).write_to(&mut out)?;
            mdat.write_to(&mut out)?;
        }
        Layout::MoovAtEnd => {
            let mdat_start = ftyp.size();
            mdat.write_to(&mut out)?;
            build_moov(tracks, mdat_start + 8)?.write_to(&mut out)?;
        }
        Layout::NoMoov => mdat.write_to(&mut out)?,
    }
    Ok(out)
}

pub fn write_clip(path: &Path, tracks: &[FixtureTrack], layout: Layout) -> anyhow::Result<()> {
    let bytes = clip_bytes(tracks, layout)?;
    File::create(path)?.write_all(&bytes)?;
    Ok(())
}

pub struct FixtureMuxer {
    path: PathBuf,
    layout: Layout,
    tracks: Vec<FixtureTrack>,
    started: bool,
    stopped: bool,
    pub orientation: u32,
    pub location: Option<(f32, f32)>,
}

impl FixtureMuxer {
    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }
}

impl ContainerMuxer for FixtureMuxer {
    fn create(path: &Path) -> anyhow::Result<Self> {
        File::create(path).with_context(|| format!("creating {}", path.display()))?;
        Ok(FixtureMuxer {
            path: path.to_path_buf(),
            layout: Layout::default(),
            tracks: Vec::new(),
            started: false,
            stopped: false,
            orientation: 0,
            location: None,
        })
    }

    fn add_track(&mut self, format: &TrackFormat) -> anyhow::Result<usize> {
        ensure!(!self.started, "add_track after start");
        self.tracks.push(FixtureTrack::new(format.clone(), Vec::new()));
        Ok(self.tracks.len() - 1)
    }

    fn start(&mut self) -> anyhow::Result<()> {
        self.started = true;
        Ok(())
    }

    fn write_sample_data(&mut self, track: usize, data: &[u8], info: &SampleInfo) -> anyhow::Result<()> {
        ensure!(self.started && !self.stopped, "write outside start/stop");
        let Some(t) = self.tracks.get_mut(track) else {
            bail!("no track {track}");
        };
        t.samples.push(Sample { data: data.to_vec(), info: *info });
        Ok(())
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        ensure!(self.started && !self.stopped, "stop without start");
        self.stopped = true;
        write_clip(&self.path, &self.tracks, self.layout)
    }

    fn set_location(&mut self, latitude: f32, longitude: f32) -> anyhow::Result<()> {
        self.location = Some((latitude, longitude));
        Ok(())
    }

    fn set_orientation_hint(&mut self, degrees: u32) -> anyhow::Result<()> {
        self.orientation = degrees;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    offset: u64,
    size: u32,
    time_us: i64,
    flags: u32,
}

struct ReadTrack {
    format: TrackFormat,
    entries: Vec<Entry>,
    cursor: usize,
    selected: bool,
}

pub struct FixtureExtractor {
    data: Vec<u8>,
    tracks: Vec<ReadTrack>,
}

fn fixture_rule<R: Read + Seek>(p: &BoxParser<R>) -> ParseRule {
    if p.check_box_stack(&[FourCC::MOOV]) || p.check_box_stack(&[FourCC::MOOV, TRAK]) {
        ParseRule::Descend
    } else if p.check_box_stack(&[FourCC::MOOV, TRAK, FMT]) || p.check_box_stack(&[FourCC::MOOV, TRAK, SMPL]) {
        ParseRule::Load
    } else {
        ParseRule::Skip
    }
}

fn parse_smpl(payload: &[u8]) -> anyhow::Result<Vec<Entry>> {
    use byteorder::{BigEndian, ReadBytesExt};
    let mut r = Cursor::new(payload);
    let count = r.read_u32::<BigEndian>()?;
    (0..count)
        .map(|_| {
            Ok(Entry {
                offset: r.read_u64::<BigEndian>()?,
                size: r.read_u32::<BigEndian>()?,
                time_us: r.read_u64::<BigEndian>()? as i64,
                flags: r.read_u32::<BigEndian>()?,
            })
        })
        .collect()
}

impl FixtureExtractor {
    fn current(&self) -> Option<(usize, Entry)> {
        self.tracks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.selected)
            .filter_map(|(i, t)| t.entries.get(t.cursor).map(|e| (i, *e)))
            .min_by_key(|(i, e)| (e.time_us, *i))
    }
}

impl ContainerExtractor for FixtureExtractor {
    fn open(path: &Path, range: Option<ByteRange>) -> anyhow::Result<Self> {
        let mut f = File::open(path)?;
        let data = match range {
            Some(range) => {
                f.seek(SeekFrom::Start(range.offset))?;
                let mut data = vec![0; range.length as usize];
                f.read_exact(&mut data)?;
                data
            }
            None => {
                let mut data = Vec::new();
                f.read_to_end(&mut data)?;
                data
            }
        };

        let parser = BoxParser::new(Cursor::new(data.clone()));
        let tree = TreeParser::new(parser, fixture_rule::<Cursor<Vec<u8>>>).parse()?;
        let mut tracks = Vec::new();
        if let Some(moov) = tree.find_child(FourCC::MOOV) {
            for trak in moov.children().unwrap_or_default().iter().filter(|b| b.typ() == TRAK) {
                let fmt = trak.find_child(FMT).and_then(|b| b.payload()).context("trak without fmt")?;
                let smpl = trak.find_child(SMPL).and_then(|b| b.payload()).context("trak without smpl")?;
                tracks.push(ReadTrack {
                    format: serde_json::from_slice(fmt)?,
                    entries: parse_smpl(smpl)?,
                    cursor: 0,
                    selected: false,
                });
            }
        }
        Ok(FixtureExtractor { data, tracks })
    }

    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn track_format(&self, track: usize) -> anyhow::Result<TrackFormat> {
        Ok(self.tracks.get(track).context("no such track")?.format.clone())
    }

    fn select_track(&mut self, track: usize) -> anyhow::Result<()> {
        self.tracks.get_mut(track).context("no such track")?.selected = true;
        Ok(())
    }

    fn unselect_track(&mut self, track: usize) -> anyhow::Result<()> {
        self.tracks.get_mut(track).context("no such track")?.selected = false;
        Ok(())
    }

    fn seek_to(&mut self, time_us: i64, mode: SeekMode) -> anyhow::Result<()> {
        for t in self.tracks.iter_mut().filter(|t| t.selected) {
            let syncs: Vec<usize> = (0..t.entries.len())
                .filter(|&i| SampleFlags(t.entries[i].flags).contains(SampleFlags::SYNC))
                .collect();
            let time = |i: usize| t.entries[i].time_us;
            let cursor = match mode {
                SeekMode::PreviousSync => {
                    syncs.iter().rev().find(|&&i| time(i) <= time_us).or(syncs.first()).copied()
                }
                SeekMode::NextSync => syncs.iter().find(|&&i| time(i) >= time_us).copied(),
                SeekMode::ClosestSync => syncs.iter().min_by_key(|&&i| (time(i) - time_us).abs()).copied(),
            };
            t.cursor = cursor.unwrap_or(t.entries.len());
        }
        Ok(())
    }

    fn advance(&mut self) -> bool {
        let Some((track, _)) = self.current() else {
            return false;
        };
        self.tracks[track].cursor += 1;
        self.current().is_some()
    }

    fn sample_track_index(&self) -> Option<usize> {
        self.current().map(|(i, _)| i)
    }

    fn sample_time(&self) -> Option<i64> {
        self.current().map(|(_, e)| e.time_us)
    }

    fn sample_size(&self) -> Option<u64> {
        self.current().map(|(_, e)| e.size as u64)
    }

    fn sample_flags(&self) -> Option<SampleFlags> {
        self.current().map(|(_, e)| SampleFlags(e.flags))
    }

    fn read_sample_data(&mut self, buf: &mut Vec<u8>) -> anyhow::Result<Option<usize>> {
        let Some((_, e)) = self.current() else {
            return Ok(None);
        };
        let start = e.offset as usize;
        let bytes = self.data.get(start..start + e.size as usize).context("sample outside the clip")?;
        buf.clear();
        buf.extend_from_slice(bytes);
        Ok(Some(bytes.len()))
    }
}
