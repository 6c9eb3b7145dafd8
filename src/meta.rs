//! `meta` boxes using the `mdta` handler: string keys in a `keys` box and
//! values in an `ilst` box, matched by position.
//!
//! ```text
//! meta
//!   hdlr            handler type "mdta"
//!   keys            count + one "mdta" box per key name
//!   ilst
//!     <1>           item for key 1 (box type is the 1-based index)
//!       data        value type, locale, value bytes
//!     <2> ...
//! ```

use crate::boxes::{BoxBuilder, FourCC, Mp4Box};
use crate::error::MetaError;
use crate::format::{
    MAX_TRACKS_PER_CLIP, META_KEY_EDVD_LENGTH, META_KEY_EDVD_OFFSET, META_KEY_TRACK_TYPES,
    META_TYPE_OPAQUE, META_TYPE_U64, TRACK_TYPE_MAP_VERSION, TrackType,
};
use crate::parser::BoxParser;
use crate::tree::{ParseRule, TreeParser, split_boxes};
use crate::util::u64_from_bytes;
use byteorder::{BigEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Cursor, Read};

type Result<T> = std::result::Result<T, MetaError>;

/// One `ilst` value: the `data` box type code and the raw value bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaValue {
    pub value_type: u32,
    pub data: Vec<u8>,
}

impl MetaValue {
    pub fn new(value_type: u32, data: impl Into<Vec<u8>>) -> Self {
        MetaValue { value_type, data: data.into() }
    }
}

pub type MetaMap = HashMap<String, MetaValue>;

pub fn hdlr_box() -> Mp4Box {
    BoxBuilder::new(FourCC::HDLR)
        .put_u32(0) // version, flags
        .put_u32(0) // pre_defined
        .put_fourcc(FourCC::MDTA)
        .put_u32(0)
        .put_u32(0)
        .put_u32(0)
        .put_u8(0) // empty name
        .build()
}

pub fn key_box(key: &str) -> Mp4Box {
    BoxBuilder::new(FourCC::MDTA).put_bytes(key.as_bytes()).build()
}

pub fn data_box(value_type: u32, value: &[u8]) -> Mp4Box {
    BoxBuilder::new(FourCC::DATA)
        .put_u32(value_type)
        .put_u32(0) // default country/language
        .put_bytes(value)
        .build()
}

pub fn keys_box(keys: &[&str]) -> Mp4Box {
    let mut b = BoxBuilder::new(FourCC::KEYS).put_u32(0).put_u32(keys.len() as u32);
    for key in keys {
        b = b.put_box(&key_box(key));
    }
    b.build()
}

/// Wrap each `data` box in an item numbered 1..=N.
pub fn ilst_box(data_boxes: &[Mp4Box]) -> Mp4Box {
    let mut b = BoxBuilder::new(FourCC::ILST);
    for (index, data) in data_boxes.iter().enumerate() {
        let item = BoxBuilder::new(FourCC::from_u32(index as u32 + 1)).put_box(data).build();
        b = b.put_box(&item);
    }
    b.build()
}

pub fn meta_box(hdlr: &Mp4Box, keys: &Mp4Box, ilst: &Mp4Box) -> Mp4Box {
    BoxBuilder::new(FourCC::META).put_box(hdlr).put_box(keys).put_box(ilst).build()
}

/// Build a complete `mdta` meta box; keys and items stay in step by construction.
pub fn mdta_meta_box(entries: &[(&str, MetaValue)]) -> Mp4Box {
    let keys: Vec<&str> = entries.iter().map(|(k, _)| *k).collect();
    let data: Vec<Mp4Box> = entries.iter().map(|(_, v)| data_box(v.value_type, &v.data)).collect();
    meta_box(&hdlr_box(), &keys_box(&keys), &ilst_box(&data))
}

pub fn parse_hdlr(payload: &[u8]) -> Result<FourCC> {
    let mut r = Cursor::new(payload);
    let mut read = || -> std::io::Result<u32> {
        r.read_u32::<BigEndian>()?; // version, flags
        r.read_u32::<BigEndian>()?; // pre_defined
        r.read_u32::<BigEndian>()
    };
    let handler = read().map_err(|_| MetaError::Truncated(FourCC::HDLR))?;
    Ok(FourCC::from_u32(handler))
}

pub fn parse_keys(payload: &[u8]) -> Result<Vec<String>> {
    let mut r = Cursor::new(payload);
    let count = r
        .read_u32::<BigEndian>()
        .and_then(|_| r.read_u32::<BigEndian>())
        .map_err(|_| MetaError::Truncated(FourCC::KEYS))?;
    let key_boxes = split_boxes(&payload[8..])?;
    if key_boxes.len() != count as usize {
        return Err(MetaError::Truncated(FourCC::KEYS));
    }
    key_boxes
        .iter()
        .map(|b| {
            if b.typ() != FourCC::MDTA && b.typ() != FourCC::UDTA {
                return Err(MetaError::KeyNamespace(b.typ()));
            }
            let key = String::from_utf8_lossy(b.payload().unwrap_or_default()).into_owned();
            tracing::trace!(%key, "meta key");
            Ok(key)
        })
        .collect()
}

fn ilst_rule<R>(parser: &BoxParser<R>) -> ParseRule {
    // items at the first level, their `data` boxes below
    if parser.box_stack().len() == 1 { ParseRule::Descend } else { ParseRule::Load }
}

pub fn parse_ilst(payload: &[u8]) -> Result<Vec<MetaValue>> {
    let parser = BoxParser::new(Cursor::new(payload)).with_limit(payload.len() as u64);
    let items = TreeParser::new(parser, ilst_rule::<Cursor<&[u8]>>).parse()?;
    items
        .boxes
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let expected = index as u32 + 1;
            if item.typ().as_u32() != expected {
                return Err(MetaError::ItemIndex { expected, found: item.typ().as_u32() });
            }
            let data = item
                .find_child(FourCC::DATA)
                .and_then(|d| d.payload())
                .ok_or(MetaError::MissingBox(FourCC::DATA))?;
            let mut r = Cursor::new(data);
            let value_type = r.read_u32::<BigEndian>().map_err(|_| MetaError::Truncated(FourCC::DATA))?;
            r.read_u32::<BigEndian>().map_err(|_| MetaError::Truncated(FourCC::DATA))?; // country/language
            let mut value = Vec::new();
            r.read_to_end(&mut value).map_err(|_| MetaError::Truncated(FourCC::DATA))?;
            Ok(MetaValue { value_type, data: value })
        })
        .collect()
}

/// Decode a loaded `meta` box into key → value.
///
/// `Ok(None)` means the box is not `mdta` metadata at all (no handler, or a
/// different one). Inconsistent `mdta` metadata is an error.
pub fn parse_mdta_meta(meta: &Mp4Box) -> Result<Option<MetaMap>> {
    let payload = meta.payload().ok_or(MetaError::MissingBox(FourCC::META))?;
    let children = split_boxes(payload)?;
    let find = |typ| children.iter().find(|b| b.typ() == typ).and_then(|b| b.payload());

    let Some(hdlr) = find(FourCC::HDLR) else {
        tracing::debug!("meta box has no hdlr");
        return Ok(None);
    };
    let handler = parse_hdlr(hdlr)?;
    if handler != FourCC::MDTA {
        tracing::debug!(%handler, "meta handler is not mdta");
        return Ok(None);
    }

    let keys = parse_keys(find(FourCC::KEYS).ok_or(MetaError::MissingBox(FourCC::KEYS))?)?;
    let values = parse_ilst(find(FourCC::ILST).ok_or(MetaError::MissingBox(FourCC::ILST))?)?;
    if keys.len() != values.len() {
        return Err(MetaError::KeyCountMismatch { keys: keys.len(), items: values.len() });
    }
    Ok(Some(keys.into_iter().zip(values).collect()))
}

/// Where the `edvd` box sits in the outer clip, as recorded in its metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdvdLocation {
    pub offset: u64,
    pub length: u64,
}

impl EdvdLocation {
    pub fn to_meta_box(self) -> Mp4Box {
        mdta_meta_box(&[
            (META_KEY_EDVD_OFFSET, MetaValue::new(META_TYPE_U64, self.offset.to_be_bytes())),
            (META_KEY_EDVD_LENGTH, MetaValue::new(META_TYPE_U64, self.length.to_be_bytes())),
        ])
    }

    pub fn from_meta(map: &MetaMap) -> Result<Self> {
        Ok(EdvdLocation {
            offset: u64_value(map, META_KEY_EDVD_OFFSET)?,
            length: u64_value(map, META_KEY_EDVD_LENGTH)?,
        })
    }
}

fn u64_value(map: &MetaMap, key: &'static str) -> Result<u64> {
    let v = map.get(key).ok_or(MetaError::MissingKey(key))?;
    if v.value_type != META_TYPE_U64 {
        return Err(MetaError::ValueType { key, found: v.value_type, expected: META_TYPE_U64 });
    }
    u64_from_bytes(&v.data).ok_or(MetaError::ValueLength { key, found: v.data.len(), expected: 8 })
}

/// `[version = 1][count = n][n type codes]`
pub fn encode_track_types(types: &[TrackType]) -> Result<Vec<u8>> {
    if types.len() > MAX_TRACKS_PER_CLIP {
        return Err(MetaError::TooManyTracks(types.len()));
    }
    let mut out = Vec::with_capacity(2 + types.len());
    out.push(TRACK_TYPE_MAP_VERSION);
    out.push(types.len() as u8);
    out.extend(types.iter().map(|t| t.code()));
    Ok(out)
}

pub fn decode_track_types(value: &[u8]) -> Result<Vec<TrackType>> {
    let [version, count, codes @ ..] = value else {
        return Err(MetaError::ValueLength { key: META_KEY_TRACK_TYPES, found: value.len(), expected: 2 });
    };
    if *version != TRACK_TYPE_MAP_VERSION {
        return Err(MetaError::UnsupportedVersion(*version));
    }
    if *count as usize != codes.len() {
        return Err(MetaError::TrackCount { declared: *count as usize, actual: codes.len() });
    }
    codes
        .iter()
        .map(|&c| TrackType::from_code(c).ok_or(MetaError::UnknownTrackType(c)))
        .collect()
}

pub fn track_types_meta_box(types: &[TrackType]) -> Result<Mp4Box> {
    let value = encode_track_types(types)?;
    Ok(mdta_meta_box(&[(META_KEY_TRACK_TYPES, MetaValue::new(META_TYPE_OPAQUE, value))]))
}

pub fn track_types_from_meta(map: &MetaMap) -> Result<Vec<TrackType>> {
    let v = map.get(META_KEY_TRACK_TYPES).ok_or(MetaError::MissingKey(META_KEY_TRACK_TYPES))?;
    decode_track_types(&v.data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hdlr_layout() {
        let hdlr = hdlr_box();
        assert_eq!(hdlr.size(), 33);
        assert_eq!(parse_hdlr(hdlr.payload().unwrap()).unwrap(), FourCC::MDTA);
        assert!(parse_hdlr(&[0; 11]).is_err());
    }

    #[test]
    fn track_map_layout() {
        let bytes = encode_track_types(&[TrackType::SharpVideo, TrackType::DepthLinear]).unwrap();
        assert_eq!(bytes, vec![1, 2, 0, 1]);
        assert!(matches!(decode_track_types(&[1, 3, 0, 1]), Err(MetaError::TrackCount { declared: 3, actual: 2 })));
        assert!(matches!(decode_track_types(&[2, 0]), Err(MetaError::UnsupportedVersion(2))));
        assert!(matches!(decode_track_types(&[1, 1, 9]), Err(MetaError::UnknownTrackType(9))));
        assert!(decode_track_types(&[1]).is_err());
        assert_eq!(decode_track_types(&[1, 0]).unwrap(), Vec::<TrackType>::new());
    }

    #[test]
    fn too_many_tracks() {
        let types = [TrackType::Metadata; MAX_TRACKS_PER_CLIP + 1];
        assert!(matches!(encode_track_types(&types), Err(MetaError::TooManyTracks(9))));
    }

    #[test]
    fn ilst_items_must_be_numbered_in_order() {
        let data = data_box(1, b"x");
        let item = BoxBuilder::new(FourCC::from_u32(2)).put_box(&data).build();
        let ilst = BoxBuilder::new(FourCC::ILST).put_box(&item).build();
        let err = parse_ilst(ilst.payload().unwrap()).unwrap_err();
        assert!(matches!(err, MetaError::ItemIndex { expected: 1, found: 2 }));
    }
}
