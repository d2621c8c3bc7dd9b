//! Length-prefixed frame transport (spec §4.1).
//!
//! A frame is a 4-byte little-endian length followed by that many payload
//! bytes. `read_frame`/`write_frame` are blocking primitives over any
//! `Read`/`Write` pair; the timeout behavior spec §4.1 asks for is layered
//! on top by [`crate::provider::session`], which runs `read_frame` on a
//! dedicated reader thread and bounds the wait with a channel `recv_timeout`
//! rather than relying on platform-specific non-blocking pipe I/O.

use std::io::{self, ErrorKind as IoErrorKind, Read, Write};

/// Maximum frame size: 1 MiB. A larger declared length is a protocol error
/// that fails the read without attempting to consume the (unread) payload.
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("read failed: {0}")]
    Read(#[source] io::Error),
    #[error("write failed: {0}")]
    Write(#[source] io::Error),
    #[error("peer closed the stream")]
    Eof,
    #[error("frame of {0} bytes exceeds maximum of {MAX_FRAME_SIZE}")]
    TooLarge(u32),
}

/// Writes one frame: `len(payload) as u32-le` followed by `payload`.
/// Oversize payloads are rejected before anything is written.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError> {
    let len = payload.len();
    if len > MAX_FRAME_SIZE as usize {
        return Err(FrameError::TooLarge(len as u32));
    }
    let len_buf = (len as u32).to_le_bytes();
    writer.write_all(&len_buf).map_err(FrameError::Write)?;
    if !payload.is_empty() {
        writer.write_all(payload).map_err(FrameError::Write)?;
    }
    writer.flush().map_err(FrameError::Write)
}

/// Reads exactly one frame. Blocks until the full frame is assembled, the
/// peer closes the stream, or a read error occurs.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>, FrameError> {
    let mut len_buf = [0u8; 4];
    read_exact_retrying(reader, &mut len_buf)?;
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge(len));
    }
    let mut payload = vec![0u8; len as usize];
    if len > 0 {
        read_exact_retrying(reader, &mut payload)?;
    }
    Ok(payload)
}

fn read_exact_retrying<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), FrameError> {
    let mut total = 0usize;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => return Err(FrameError::Eof),
            Ok(n) => total += n,
            Err(e) if e.kind() == IoErrorKind::Interrupted => continue,
            Err(e) => return Err(FrameError::Read(e)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_a_frame() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello").unwrap();
        assert_eq!(&buf[..4], &5u32.to_le_bytes());
        let mut cur = Cursor::new(buf);
        let payload = read_frame(&mut cur).unwrap();
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn accepts_exactly_max_size() {
        let payload = vec![0u8; MAX_FRAME_SIZE as usize];
        let mut buf = Vec::new();
        assert!(write_frame(&mut buf, &payload).is_ok());
    }

    #[test]
    fn rejects_one_byte_over_max_on_write() {
        let payload = vec![0u8; MAX_FRAME_SIZE as usize + 1];
        let mut buf = Vec::new();
        assert!(matches!(
            write_frame(&mut buf, &payload),
            Err(FrameError::TooLarge(_))
        ));
    }

    #[test]
    fn rejects_oversize_declared_length_on_read() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_SIZE + 1).to_le_bytes());
        let mut cur = Cursor::new(buf);
        let err = read_frame(&mut cur).unwrap_err();
        assert!(matches!(err, FrameError::TooLarge(_)));
    }

    #[test]
    fn eof_before_length_prefix_is_eof() {
        let mut cur = Cursor::new(Vec::<u8>::new());
        let err = read_frame(&mut cur).unwrap_err();
        assert!(matches!(err, FrameError::Eof));
    }

    #[test]
    fn empty_payload_round_trips() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"").unwrap();
        let mut cur = Cursor::new(buf);
        let payload = read_frame(&mut cur).unwrap();
        assert!(payload.is_empty());
    }
}
