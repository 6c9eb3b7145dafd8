use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Role of a track stored in the inner (depth) clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum TrackType {
    SharpVideo = 0,
    DepthLinear = 1,
    DepthInverse = 2,
    Metadata = 3,
    TranslucentVideo = 4,
}

impl TrackType {
    pub const COUNT: usize = 5;

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(TrackType::SharpVideo),
            1 => Some(TrackType::DepthLinear),
            2 => Some(TrackType::DepthInverse),
            3 => Some(TrackType::Metadata),
            4 => Some(TrackType::TranslucentVideo),
            _ => None,
        }
    }
}

impl fmt::Display for TrackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrackType::SharpVideo => "sharp-video",
            TrackType::DepthLinear => "depth-linear",
            TrackType::DepthInverse => "depth-inverse",
            TrackType::Metadata => "metadata",
            TrackType::TranslucentVideo => "translucent-video",
        };
        f.write_str(s)
    }
}

// Keys and `data` value types of the private depth-container metadata.
pub const META_KEY_EDVD_OFFSET: &str = "editable.tracks.offset";
pub const META_KEY_EDVD_LENGTH: &str = "editable.tracks.length";
pub const META_KEY_TRACK_TYPES: &str = "editable.tracks.map";
/// Well-known type 78: big-endian 64-bit unsigned integer.
pub const META_TYPE_U64: u32 = 78;
/// Well-known type 0: reserved, no type indicated.
pub const META_TYPE_OPAQUE: u32 = 0;
/// Well-known type 1: UTF-8 text.
pub const META_TYPE_UTF8: u32 = 1;

pub const TRACK_TYPE_MAP_VERSION: u8 = 1;
/// Most tracks either clip may hold.
pub const MAX_TRACKS_PER_CLIP: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormatValue {
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

/// Description of one track as handed to or reported by a container.
///
/// `track_type` is the depth tag: set on a format given to the depth muxer it
/// routes the track to the inner clip, and the depth extractor sets it on
/// every track recovered from the inner clip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackFormat {
    pub mime: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_type: Option<TrackType>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, FormatValue>,
}

impl TrackFormat {
    pub fn new(mime: impl Into<String>) -> Self {
        TrackFormat { mime: mime.into(), ..Default::default() }
    }

    pub fn with_track_type(mut self, track_type: TrackType) -> Self {
        self.track_type = Some(track_type);
        self
    }

    pub fn with_int(mut self, key: &str, value: i64) -> Self {
        self.params.insert(key.to_string(), FormatValue::Int(value));
        self
    }

    pub fn set(&mut self, key: &str, value: FormatValue) {
        self.params.insert(key.to_string(), value);
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        match self.params.get(key)? {
            FormatValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.params.get(key)? {
            FormatValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_inner(&self) -> bool {
        self.track_type.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_type_codes_round_trip() {
        for code in 0..TrackType::COUNT as u8 {
            let t = TrackType::from_code(code).unwrap();
            assert_eq!(t.code(), code);
        }
        assert_eq!(TrackType::from_code(5), None);
    }

    #[test]
    fn format_serializes_tag_only_when_set() {
        let outer = TrackFormat::new("audio/mp4a-latm").with_int("sample-rate", 48000);
        let json = serde_json::to_string(&outer).unwrap();
        assert!(!json.contains("track_type"));

        let inner = TrackFormat::new("video/hevc").with_track_type(TrackType::DepthLinear);
        let json = serde_json::to_string(&inner).unwrap();
        assert!(json.contains("\"depth-linear\""));
        let back: TrackFormat = serde_json::from_str(&json).unwrap();
        assert_eq!(back, inner);
        assert!(back.is_inner());
    }
}
