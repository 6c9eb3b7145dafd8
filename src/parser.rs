use crate::boxes::{BoxHeader, FourCC, Mp4Box, USE_LARGE_SIZE};
use byteorder::{BigEndian, ReadBytesExt};
use std::io::{self, Read, Seek, SeekFrom};

/// Upper bound for payloads loaded into memory. Only small metadata boxes
/// are ever loaded; `mdat` never is.
pub const DEFAULT_LOAD_LIMIT: u64 = 1024 * 1024;

#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid size {size} for box {typ}")]
    InvalidSize { typ: FourCC, size: u64 },
    #[error("truncated box header at offset {offset}")]
    TruncatedHeader { offset: u64 },
    #[error("box {typ} at offset {offset} extends past its container")]
    BoxOverrun { typ: FourCC, offset: u64 },
    #[error("box {typ} payload of {size} bytes exceeds the {limit} byte load limit")]
    PayloadTooLarge { typ: FourCC, size: u64, limit: u64 },
    #[error("box {typ} payload was partially consumed before loading")]
    PayloadConsumed { typ: FourCC },
    #[error("no open box to close")]
    NoOpenBox,
}

pub type Result<T> = std::result::Result<T, ParseError>;

/// Fill `buf` completely, or report how many bytes were available before EOF.
fn read_up_to<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut got = 0;
    while got < buf.len() {
        match r.read(&mut buf[got..]) {
            Ok(0) => break,
            Ok(n) => got += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(got)
}

fn map_eof(e: io::Error, offset: u64) -> ParseError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        ParseError::TruncatedHeader { offset }
    } else {
        ParseError::Io(e)
    }
}

/// Read one box header at the current position of `r`.
///
/// Returns `Ok(None)` at a clean end of stream. `offset` is only used for
/// error reporting and for the returned header's `start`.
pub fn read_box_header<R: Read>(r: &mut R, offset: u64) -> Result<Option<BoxHeader>> {
    let mut head = [0u8; 8];
    match read_up_to(r, &mut head)? {
        0 => return Ok(None),
        8 => {}
        _ => return Err(ParseError::TruncatedHeader { offset }),
    }
    let size32 = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
    let typ = FourCC([head[4], head[5], head[6], head[7]]);

    let large_size = size32 == USE_LARGE_SIZE;
    let size = if large_size {
        r.read_u64::<BigEndian>().map_err(|e| map_eof(e, offset))?
    } else {
        size32 as u64
    };

    let uuid = if typ == FourCC::UUID {
        let mut u = [0u8; 16];
        r.read_exact(&mut u).map_err(|e| map_eof(e, offset))?;
        Some(u)
    } else {
        None
    };

    let hdr = BoxHeader::from_parts(size, typ, large_size, uuid).with_start(offset);
    // size 0 ("to end of file") is not supported
    if size < hdr.header_size {
        return Err(ParseError::InvalidSize { typ, size });
    }
    Ok(Some(hdr))
}

/// Sequential parser over a random-access source.
///
/// Keeps the chain of boxes currently open. Offsets are relative to the
/// position of the source when the parser was created.
pub struct BoxParser<R> {
    src: R,
    offset: u64,
    limit: Option<u64>,
    stack: Vec<BoxHeader>,
    load_limit: u64,
}

impl<R: Read + Seek> BoxParser<R> {
    pub fn new(src: R) -> Self {
        BoxParser { src, offset: 0, limit: None, stack: Vec::new(), load_limit: DEFAULT_LOAD_LIMIT }
    }

    /// Stop at `len` bytes instead of the end of the source.
    pub fn with_limit(mut self, len: u64) -> Self {
        self.limit = Some(len);
        self
    }

    pub fn with_load_limit(mut self, limit: u64) -> Self {
        self.load_limit = limit;
        self
    }

    /// Parse the next header and open it. The position is left at the start
    /// of its payload; the box stays open until `close_box` or
    /// `load_and_close_box`, even when its payload is empty.
    ///
    /// Returns `None` at the end of the source, or when the innermost open
    /// box has no bytes left.
    pub fn next_box(&mut self) -> Result<Option<BoxHeader>> {
        let end = self.enclosing_end()?;
        if end <= self.offset {
            return Ok(None);
        }
        let Some(hdr) = read_box_header(&mut self.src, self.offset)? else {
            return Ok(None);
        };
        match self.offset.checked_add(hdr.size) {
            Some(box_end) if box_end <= end => {}
            _ => return Err(ParseError::BoxOverrun { typ: hdr.typ, offset: self.offset }),
        }
        tracing::trace!(typ = %hdr.typ, offset = self.offset, size = hdr.size, depth = self.stack.len(), "open box");
        self.offset += hdr.header_size;
        self.stack.push(hdr.clone());
        Ok(Some(hdr))
    }

    /// Skip the unread payload of the innermost open box and close it.
    /// Returns the number of bytes skipped.
    ///
    /// The parent may need closing too; see `should_close_parent`.
    pub fn close_box(&mut self) -> Result<u64> {
        let hdr = self.stack.pop().ok_or(ParseError::NoOpenBox)?;
        let end = frame_end(&hdr);
        let skip = end.saturating_sub(self.offset);
        let delta = i64::try_from(skip).map_err(|_| ParseError::InvalidSize { typ: hdr.typ, size: hdr.size })?;
        if delta > 0 {
            self.src.seek(SeekFrom::Current(delta))?;
        }
        self.offset = end;
        tracing::trace!(typ = %hdr.typ, skipped = skip, "close box");
        Ok(skip)
    }

    /// Read the payload of the innermost open box into memory and close it.
    pub fn load_and_close_box(&mut self) -> Result<Mp4Box> {
        let hdr = self.stack.last().ok_or(ParseError::NoOpenBox)?;
        let payload_start = frame_end(hdr) - hdr.payload_size();
        if self.offset != payload_start {
            return Err(ParseError::PayloadConsumed { typ: hdr.typ });
        }
        let size = hdr.payload_size();
        if size > self.load_limit {
            return Err(ParseError::PayloadTooLarge { typ: hdr.typ, size, limit: self.load_limit });
        }
        let mut payload = vec![0u8; size as usize];
        self.src.read_exact(&mut payload).map_err(|e| map_eof(e, self.offset))?;
        self.offset += size;
        let hdr = self.stack.pop().ok_or(ParseError::NoOpenBox)?;
        tracing::trace!(typ = %hdr.typ, loaded = size, "load box");
        Ok(Mp4Box::loaded(hdr, payload))
    }

    fn enclosing_end(&mut self) -> Result<u64> {
        if let Some(hdr) = self.stack.last() {
            return Ok(frame_end(hdr));
        }
        match self.limit {
            Some(limit) => Ok(limit),
            None => {
                // bound the walk by what the source actually holds
                let pos = self.src.stream_position()?;
                let len = crate::util::stream_len(&mut self.src)?;
                let limit = self.offset + len.saturating_sub(pos);
                self.limit = Some(limit);
                Ok(limit)
            }
        }
    }
}

// read-only accessors, usable from rule functions without I/O bounds
impl<R> BoxParser<R> {
    /// Whether the cursor sits exactly at the end of the innermost open box,
    /// meaning the caller must close it as well. Poll until false.
    ///
    /// Right after `next_box` opens a box with an empty payload this is also
    /// true, for that box itself rather than its parent.
    pub fn should_close_parent(&self) -> bool {
        self.stack.last().is_some_and(|hdr| self.offset == frame_end(hdr))
    }

    /// Compare the chain of open box types, outermost first, against `path`.
    pub fn check_box_stack(&self, path: &[FourCC]) -> bool {
        self.stack.len() == path.len() && self.stack.iter().zip(path).all(|(h, t)| h.typ == *t)
    }

    pub fn box_stack(&self) -> &[BoxHeader] {
        &self.stack
    }

    /// Innermost open box; `None` between a close and the next `next_box`
    /// at top level.
    pub fn current_box(&self) -> Option<&BoxHeader> {
        self.stack.last()
    }

    pub fn current_offset(&self) -> u64 {
        self.offset
    }

    pub fn into_inner(self) -> R {
        self.src
    }
}

fn frame_end(hdr: &BoxHeader) -> u64 {
    // headers on the stack were placed by `next_box`
    hdr.start.unwrap_or_default() + hdr.size
}
