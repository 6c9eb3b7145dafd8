pub mod boxes;
pub mod container;
pub mod editor;
pub mod error;
pub mod extractor;
pub mod format;
pub mod interleave;
pub mod meta;
pub mod muxer;
pub mod parser;
pub mod reader;
pub mod tree;
pub mod util;

pub use boxes::{BoxBuilder, BoxHeader, BoxTree, FourCC, Mp4Box};
pub use container::{ByteRange, ClipOrigin, ContainerExtractor, ContainerMuxer, SampleFlags, SampleInfo, SeekMode, TrackInfo};
pub use editor::{DepthMetaEditor, EditOptions, EditType, edit_track_types, how_to_edit, merge_files};
pub use error::{Error, MetaError, Result};
pub use extractor::DepthExtractor;
pub use format::{TrackFormat, TrackType};
pub use interleave::SampleInterleaver;
pub use muxer::DepthMuxer;
pub use parser::{BoxParser, ParseError, read_box_header};
pub use reader::{DepthClipInfo, probe_path, read_depth_clip_info};
pub use tree::{ParseRule, TreeParser, parse_for_meta, split_boxes};
