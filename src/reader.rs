//! Detection of an inner clip embedded in an outer clip.

use crate::boxes::{BoxTree, FourCC, Mp4Box};
use crate::container::ByteRange;
use crate::error::{MetaError, Result};
use crate::format::TrackType;
use crate::meta::{EdvdLocation, parse_mdta_meta, track_types_from_meta};
use crate::tree::parse_for_meta;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// Where the `edvd` box sits and what the inner clip inside it holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthClipInfo {
    pub edvd_offset: u64,
    pub edvd_size: u64,
    pub edvd_header_size: u64,
    pub inner_track_types: Vec<TrackType>,
}

impl DepthClipInfo {
    /// Byte range of the complete inner MP4 inside the outer file.
    pub fn inner_clip_range(&self) -> ByteRange {
        ByteRange {
            offset: self.edvd_offset + self.edvd_header_size,
            length: self.edvd_size - self.edvd_header_size,
        }
    }
}

/// Look for an embedded inner clip, reading from the start of `r`.
///
/// Returns `Ok(None)` for anything that is not a well-formed depth clip,
/// including clips whose metadata cannot be decoded. I/O and box structure
/// errors are returned as errors.
pub fn read_depth_clip_info<R: Read + Seek>(mut r: R) -> Result<Option<DepthClipInfo>> {
    r.seek(SeekFrom::Start(0))?;
    let tree = parse_for_meta(r)?;
    let Some(edvd) = tree.find_child(FourCC::EDVD) else {
        tracing::debug!("no edvd box, not a depth clip");
        return Ok(None);
    };
    let edvd_offset = edvd.start().unwrap_or_default();

    match moov_meta(&tree) {
        Some(meta) => match decode(meta, EdvdLocation::from_meta) {
            Some(loc) if loc.offset == edvd_offset && loc.length == edvd.size() => {}
            Some(loc) => {
                tracing::warn!(
                    recorded_offset = loc.offset,
                    recorded_length = loc.length,
                    edvd_offset,
                    edvd_size = edvd.size(),
                    "recorded edvd location does not match the edvd box"
                );
                return Ok(None);
            }
            None => return Ok(None),
        },
        None => tracing::warn!("edvd box exists but the outer clip has no meta box"),
    }

    let inner_meta = edvd.find_child(FourCC::MOOV).and_then(|moov| moov.find_child(FourCC::META));
    let Some(inner_meta) = inner_meta else {
        tracing::warn!("inner clip has no meta box");
        return Ok(None);
    };
    let Some(inner_track_types) = decode(inner_meta, track_types_from_meta) else {
        return Ok(None);
    };

    let info = DepthClipInfo {
        edvd_offset,
        edvd_size: edvd.size(),
        edvd_header_size: edvd.hdr.header_size,
        inner_track_types,
    };
    tracing::debug!(
        offset = info.edvd_offset,
        size = info.edvd_size,
        header = info.edvd_header_size,
        types = ?info.inner_track_types,
        "depth clip detected"
    );
    Ok(Some(info))
}

/// Read the track-type vector from a standalone (not yet merged) inner clip.
pub fn read_inner_clip_meta<R: Read + Seek>(mut r: R) -> Result<Option<Vec<TrackType>>> {
    r.seek(SeekFrom::Start(0))?;
    let tree = parse_for_meta(r)?;
    let Some(meta) = moov_meta(&tree) else {
        tracing::warn!("inner clip has no meta box");
        return Ok(None);
    };
    Ok(decode(meta, track_types_from_meta))
}

pub fn probe_path(path: impl AsRef<Path>) -> Result<Option<DepthClipInfo>> {
    let file = File::open(path)?;
    read_depth_clip_info(BufReader::new(file))
}

fn moov_meta(tree: &BoxTree) -> Option<&Mp4Box> {
    tree.find_child(FourCC::MOOV)?.find_child(FourCC::META)
}

/// Metadata that cannot be decoded means "not ours": log and drop it.
fn decode<T>(meta: &Mp4Box, f: impl FnOnce(&crate::meta::MetaMap) -> std::result::Result<T, MetaError>) -> Option<T> {
    let map = match parse_mdta_meta(meta) {
        Ok(Some(map)) => map,
        Ok(None) => {
            tracing::debug!("meta box is not mdta metadata");
            return None;
        }
        Err(e) => {
            tracing::debug!(error = %e, "cannot decode meta box");
            return None;
        }
    };
    f(&map).map_err(|e| tracing::debug!(error = %e, "metadata lacks depth entries")).ok()
}
