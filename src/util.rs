use std::io::{self, Read, Seek, SeekFrom, Write};

pub const MAX_U32: u64 = 0xFFFF_FFFF;

pub fn u32_to_bytes(x: u32) -> [u8; 4] {
    x.to_be_bytes()
}

pub fn u64_to_bytes(x: u64) -> [u8; 8] {
    x.to_be_bytes()
}

/// Big-endian u32 from exactly 4 bytes; `None` for any other length.
pub fn u32_from_bytes(bytes: &[u8]) -> Option<u32> {
    let b: [u8; 4] = bytes.try_into().ok()?;
    Some(u32::from_be_bytes(b))
}

/// Big-endian u64 from exactly 8 bytes; `None` for any other length.
pub fn u64_from_bytes(bytes: &[u8]) -> Option<u64> {
    let b: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_be_bytes(b))
}

/// Total length of a seekable stream. The stream position is restored.
pub fn stream_len<S: Seek>(s: &mut S) -> io::Result<u64> {
    let pos = s.stream_position()?;
    let len = s.seek(SeekFrom::End(0))?;
    if pos != len {
        s.seek(SeekFrom::Start(pos))?;
    }
    Ok(len)
}

/// Copy bytes from `r` to `w` through a fixed-size buffer.
///
/// With `len = Some(n)` exactly `n` bytes are copied and a short source is an
/// `UnexpectedEof` error; with `None` the copy runs to the end of `r`.
/// Returns the number of bytes copied.
pub fn copy_range<R: Read, W: Write>(
    r: &mut R,
    w: &mut W,
    len: Option<u64>,
    buf_size: usize,
) -> io::Result<u64> {
    let mut buf = vec![0u8; buf_size.max(1)];
    let mut copied = 0u64;
    loop {
        let want = match len {
            Some(n) if copied >= n => break,
            Some(n) => (n - copied).min(buf.len() as u64) as usize,
            None => buf.len(),
        };
        let got = match r.read(&mut buf[..want]) {
            Ok(0) => break,
            Ok(got) => got,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        w.write_all(&buf[..got])?;
        copied += got as u64;
    }
    if let Some(n) = len {
        if copied != n {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("copied {copied} of {n} bytes"),
            ));
        }
    }
    Ok(copied)
}

/// Write `len` filler bytes without materializing them.
pub fn write_fill<W: Write>(w: &mut W, byte: u8, len: u64) -> io::Result<()> {
    let copied = io::copy(&mut io::repeat(byte).take(len), w)?;
    debug_assert_eq!(copied, len);
    Ok(())
}
