use crate::util::{MAX_U32, u32_to_bytes, u64_to_bytes};
use std::fmt;
use std::io::{self, Write};

pub const COMPACT_HEADER_SIZE: u64 = 8;
const LARGE_SIZE_FIELD: u64 = 8;
const USER_TYPE_FIELD: u64 = 16;
/// 32-bit size value announcing a 64-bit size field.
pub(crate) const USE_LARGE_SIZE: u32 = 1;

#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    pub const UUID: FourCC = FourCC(*b"uuid");
    pub const MOOV: FourCC = FourCC(*b"moov");
    pub const FREE: FourCC = FourCC(*b"free");
    pub const META: FourCC = FourCC(*b"meta");
    pub const MDAT: FourCC = FourCC(*b"mdat");
    pub const EDVD: FourCC = FourCC(*b"edvd");
    pub const HDLR: FourCC = FourCC(*b"hdlr");
    pub const KEYS: FourCC = FourCC(*b"keys");
    pub const ILST: FourCC = FourCC(*b"ilst");
    pub const DATA: FourCC = FourCC(*b"data");
    pub const MDTA: FourCC = FourCC(*b"mdta");
    pub const UDTA: FourCC = FourCC(*b"udta");

    pub fn from_str(s: &str) -> Option<Self> {
        let b = s.as_bytes();
        if b.len() == 4 {
            Some(FourCC([b[0], b[1], b[2], b[3]]))
        } else {
            None
        }
    }

    /// `ilst` items are typed by their 1-based key index rather than by text.
    pub fn from_u32(x: u32) -> Self {
        FourCC(u32_to_bytes(x))
    }

    pub fn as_u32(&self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    pub fn as_str_lossy(&self) -> String {
        self.0
            .iter()
            .map(|&c| if (32..=126).contains(&c) { c as char } else { '.' })
            .collect()
    }
}
impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str_lossy())
    }
}
impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str_lossy())
    }
}

/// Header of one box.
///
/// `size` always holds the total size including the header, whichever of the
/// 32-bit or 64-bit fields carried it on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoxHeader {
    pub size: u64,
    pub typ: FourCC,
    pub uuid: Option<[u8; 16]>,
    pub header_size: u64, // 8, 16, 24 or 32
    pub large_size: bool,
    pub start: Option<u64>, // file offset of header start, once placed
}

impl BoxHeader {
    pub(crate) fn from_parts(size: u64, typ: FourCC, large_size: bool, uuid: Option<[u8; 16]>) -> Self {
        let header_size = COMPACT_HEADER_SIZE
            + if large_size { LARGE_SIZE_FIELD } else { 0 }
            + if uuid.is_some() { USER_TYPE_FIELD } else { 0 };
        BoxHeader { size, typ, uuid, header_size, large_size, start: None }
    }

    /// A compact (8-byte header) box of the given total size.
    ///
    /// Returns `None` when `size` cannot be carried by the 32-bit field, is
    /// smaller than the header itself, or `typ` is `uuid` (the compact form
    /// has no room for the extended type).
    pub fn compact(typ: FourCC, size: u64) -> Option<Self> {
        if typ == FourCC::UUID || size < COMPACT_HEADER_SIZE || size > MAX_U32 {
            return None;
        }
        Some(Self::from_parts(size, typ, false, None))
    }

    /// Pick the compact form when the total size fits in 32 bits, the
    /// large-size form otherwise.
    ///
    /// A `uuid` box gets an all-zero extended type; use
    /// `for_uuid_payload_size` to choose it.
    pub fn for_payload_size(typ: FourCC, payload_size: u64) -> Self {
        let uuid = (typ == FourCC::UUID).then_some([0u8; 16]);
        Self::sized(typ, uuid, payload_size)
    }

    pub fn for_uuid_payload_size(uuid: [u8; 16], payload_size: u64) -> Self {
        Self::sized(FourCC::UUID, Some(uuid), payload_size)
    }

    fn sized(typ: FourCC, uuid: Option<[u8; 16]>, payload_size: u64) -> Self {
        let fixed = COMPACT_HEADER_SIZE + if uuid.is_some() { USER_TYPE_FIELD } else { 0 };
        let compact_size = fixed.saturating_add(payload_size);
        if compact_size <= MAX_U32 {
            Self::from_parts(compact_size, typ, false, uuid)
        } else {
            let size = (fixed + LARGE_SIZE_FIELD).saturating_add(payload_size);
            Self::from_parts(size, typ, true, uuid)
        }
    }

    pub fn with_start(mut self, start: u64) -> Self {
        self.start = Some(start);
        self
    }

    pub fn payload_size(&self) -> u64 {
        self.size - self.header_size
    }

    /// Offset one past the last byte of the box, when placed.
    pub fn end(&self) -> Option<u64> {
        self.start.map(|s| s + self.size)
    }

    pub fn is_compact(&self) -> bool {
        !self.large_size && self.uuid.is_none()
    }

    /// Serialize the header fields; the exact inverse of `read_box_header`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.header_size as usize);
        if self.large_size {
            out.extend_from_slice(&u32_to_bytes(USE_LARGE_SIZE));
            out.extend_from_slice(&self.typ.0);
            out.extend_from_slice(&u64_to_bytes(self.size));
        } else {
            out.extend_from_slice(&u32_to_bytes(self.size as u32));
            out.extend_from_slice(&self.typ.0);
        }
        if let Some(u) = &self.uuid {
            out.extend_from_slice(u);
        }
        out
    }
}

/// A box with optional children (only when the parser descended into it)
/// and an optional in-memory payload (only when it was loaded).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mp4Box {
    pub hdr: BoxHeader,
    children: Option<Vec<Mp4Box>>,
    payload: Option<Vec<u8>>,
}

impl Mp4Box {
    pub fn new(hdr: BoxHeader) -> Self {
        Mp4Box { hdr, children: None, payload: None }
    }

    /// An in-memory box whose header is sized for `payload`.
    pub fn with_payload(typ: FourCC, payload: Vec<u8>) -> Self {
        let hdr = BoxHeader::for_payload_size(typ, payload.len() as u64);
        Mp4Box { hdr, children: None, payload: Some(payload) }
    }

    /// An in-memory `uuid` box with the given extended type.
    pub fn with_uuid_payload(uuid: [u8; 16], payload: Vec<u8>) -> Self {
        let hdr = BoxHeader::for_uuid_payload_size(uuid, payload.len() as u64);
        Mp4Box { hdr, children: None, payload: Some(payload) }
    }

    /// Attach a loaded payload to a parsed header.
    pub(crate) fn loaded(hdr: BoxHeader, payload: Vec<u8>) -> Self {
        debug_assert_eq!(hdr.payload_size(), payload.len() as u64);
        Mp4Box { hdr, children: None, payload: Some(payload) }
    }

    pub fn typ(&self) -> FourCC {
        self.hdr.typ
    }

    pub fn size(&self) -> u64 {
        self.hdr.size
    }

    pub fn start(&self) -> Option<u64> {
        self.hdr.start
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    pub fn children(&self) -> Option<&[Mp4Box]> {
        self.children.as_deref()
    }

    pub fn set_children(&mut self, boxes: Vec<Mp4Box>) {
        self.children = Some(boxes);
    }

    pub fn add_child(&mut self, b: Mp4Box) {
        self.children.get_or_insert_with(Vec::new).push(b);
    }

    pub fn child_at(&self, index: usize) -> Option<&Mp4Box> {
        self.children.as_ref()?.get(index)
    }

    pub fn find_child(&self, typ: FourCC) -> Option<&Mp4Box> {
        find_in(self.children.as_deref()?, typ)
    }

    pub fn index_of_child(&self, typ: FourCC) -> Option<usize> {
        index_in(self.children.as_deref()?, typ)
    }

    /// Header blob followed by the in-memory payload.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let payload = self.payload.as_deref().unwrap_or_default();
        if payload.len() as u64 != self.hdr.payload_size() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("box {} payload is not in memory", self.hdr.typ),
            ));
        }
        w.write_all(&self.hdr.to_bytes())?;
        w.write_all(payload)
    }

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.hdr.size as usize);
        self.write_to(&mut out)?;
        Ok(out)
    }
}

/// The top-level boxes of a file or buffer, acting as a virtual root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoxTree {
    pub boxes: Vec<Mp4Box>,
}

impl BoxTree {
    pub fn child_at(&self, index: usize) -> Option<&Mp4Box> {
        self.boxes.get(index)
    }

    pub fn find_child(&self, typ: FourCC) -> Option<&Mp4Box> {
        find_in(&self.boxes, typ)
    }

    pub fn index_of_child(&self, typ: FourCC) -> Option<usize> {
        index_in(&self.boxes, typ)
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }
}

fn find_in(boxes: &[Mp4Box], typ: FourCC) -> Option<&Mp4Box> {
    boxes.iter().find(|b| b.hdr.typ == typ)
}

fn index_in(boxes: &[Mp4Box], typ: FourCC) -> Option<usize> {
    boxes.iter().position(|b| b.hdr.typ == typ)
}

/// Incremental writer for small in-memory boxes.
pub struct BoxBuilder {
    typ: FourCC,
    uuid: Option<[u8; 16]>,
    buf: Vec<u8>,
}

impl BoxBuilder {
    pub fn new(typ: FourCC) -> Self {
        BoxBuilder { typ, uuid: None, buf: Vec::new() }
    }

    pub fn new_uuid(uuid: [u8; 16]) -> Self {
        BoxBuilder { typ: FourCC::UUID, uuid: Some(uuid), buf: Vec::new() }
    }

    pub fn put_u8(mut self, x: u8) -> Self {
        self.buf.push(x);
        self
    }

    pub fn put_u32(mut self, x: u32) -> Self {
        self.buf.extend_from_slice(&u32_to_bytes(x));
        self
    }

    pub fn put_u64(mut self, x: u64) -> Self {
        self.buf.extend_from_slice(&u64_to_bytes(x));
        self
    }

    pub fn put_fourcc(mut self, x: FourCC) -> Self {
        self.buf.extend_from_slice(&x.0);
        self
    }

    pub fn put_bytes(mut self, bytes: &[u8]) -> Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Append a whole in-memory box (header and payload).
    pub fn put_box(mut self, b: &Mp4Box) -> Self {
        self.buf.extend_from_slice(&b.hdr.to_bytes());
        self.buf.extend_from_slice(b.payload().unwrap_or_default());
        self
    }

    pub fn build(self) -> Mp4Box {
        match self.uuid {
            Some(uuid) => Mp4Box::with_uuid_payload(uuid, self.buf),
            None => Mp4Box::with_payload(self.typ, self.buf),
        }
    }
}
