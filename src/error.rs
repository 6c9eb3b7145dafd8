use crate::boxes::FourCC;
use crate::parser::ParseError;

/// Structural problems in `mdta` metadata.
#[derive(thiserror::Error, Debug)]
pub enum MetaError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("missing {0} box")]
    MissingBox(FourCC),
    #[error("{0} box is truncated")]
    Truncated(FourCC),
    #[error("{keys} keys but {items} ilst items")]
    KeyCountMismatch { keys: usize, items: usize },
    #[error("ilst item {found} where {expected} was expected")]
    ItemIndex { expected: u32, found: u32 },
    #[error("key box type {0} is neither mdta nor udta")]
    KeyNamespace(FourCC),
    #[error("metadata key {0} is absent")]
    MissingKey(&'static str),
    #[error("metadata key {key} has value type {found}, expected {expected}")]
    ValueType { key: &'static str, found: u32, expected: u32 },
    #[error("metadata key {key} has {found} value bytes, expected {expected}")]
    ValueLength { key: &'static str, found: usize, expected: usize },
    #[error("track map declares {declared} tracks but holds {actual}")]
    TrackCount { declared: usize, actual: usize },
    #[error("unsupported track map version {0}")]
    UnsupportedVersion(u8),
    #[error("unknown track type code {0}")]
    UnknownTrackType(u8),
    #[error("{0} tracks exceed the per-clip limit")]
    TooManyTracks(usize),
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse: {0}")]
    Parse(#[from] ParseError),
    #[error("metadata: {0}")]
    Meta(#[from] MetaError),
    #[error("clip cannot be edited in place: {reason}")]
    CannotEdit { reason: &'static str },
    #[error("moov uses the 64-bit size form, which cannot be edited in place")]
    LargeSizeMoov,
    #[error("free box holds {available} bytes but {required} are needed")]
    FreeBoxTooSmall { available: u64, required: u64 },
    #[error("edvd offset {recorded} recorded in metadata but the box ends up at {actual}")]
    EdvdOffset { recorded: u64, actual: u64 },
    #[error("no track with index {0}")]
    UnknownTrack(usize),
    #[error("{0} tracks exceed the per-clip limit")]
    TooManyTracks(usize),
    #[error("track {track}: timestamp {time_us} precedes {previous_us}")]
    NonMonotonic { track: usize, time_us: i64, previous_us: i64 },
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error(transparent)]
    Container(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
