//! Helpers for peeking tagged frames with length prefixes.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::{MessageType, read_cstr::ReadCStrError};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

/// Tag byte plus the u32 length.
pub const HEADER_LEN: usize = 5;

// -----------------------------------------------------------------------------
// ----- FrameHeader -----------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub message_type: MessageType,
    /// Value of the length field: counts itself and the body, not the tag.
    pub len: usize,
    /// Tag + length field + body.
    pub total_len: usize,
}

impl FrameHeader {
    pub fn body_len(&self) -> usize {
        self.len - 4
    }
}

// -----------------------------------------------------------------------------
// ----- FrameError ------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("unknown frame tag 0x{0:02x}")]
    UnknownTag(u8),

    #[error("invalid frame length {0}")]
    InvalidLength(usize),

    #[error("frame of {len} bytes exceeds limit of {max}")]
    TooLarge { len: usize, max: usize },

    #[error("unexpected tag: expected {expected:?}, found {found:?}")]
    UnexpectedType {
        expected: MessageType,
        found: MessageType,
    },

    #[error("truncated {0} body")]
    Truncated(&'static str),

    #[error("trailing bytes after {0} body")]
    TrailingBytes(&'static str),

    #[error("invalid string field: {0}")]
    InvalidString(String),

    #[error("empty {0}")]
    EmptyField(&'static str),

    #[error("unknown response status {0}")]
    UnknownStatus(u8),

    #[error("unknown control code {0}")]
    UnknownControlCode(u8),
}

impl From<ReadCStrError> for FrameError {
    fn from(e: ReadCStrError) -> Self {
        FrameError::InvalidString(e.to_string())
    }
}

// -----------------------------------------------------------------------------
// ----- Peek ------------------------------------------------------------------

/// Inspect the front of `buf` for one complete frame.
///
/// `Ok(None)` means more bytes are needed. Structural problems visible from
/// the header alone are reported as soon as the header is buffered, so a
/// hostile length never makes the caller wait for (or allocate) the body.
pub fn peek_frame(buf: &[u8], max_frame_size: usize) -> Result<Option<FrameHeader>, FrameError> {
    let Some(&tag) = buf.first() else {
        return Ok(None);
    };

    let message_type = MessageType::from_tag(tag).ok_or(FrameError::UnknownTag(tag))?;

    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    if len < 4 {
        return Err(FrameError::InvalidLength(len));
    }

    let total_len = 1 + len;
    if total_len > max_frame_size {
        return Err(FrameError::TooLarge {
            len: total_len,
            max: max_frame_size,
        });
    }

    if buf.len() < total_len {
        return Ok(None);
    }

    Ok(Some(FrameHeader {
        message_type,
        len,
        total_len,
    }))
}

// -----------------------------------------------------------------------------
// ----- Internal: encode helpers ----------------------------------------------

/// Wrap an encoded body with tag and length.
pub(crate) fn encode(message_type: MessageType, body_size: usize, put_body: impl FnOnce(&mut BytesMut)) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + body_size);
    buf.put_u8(message_type.tag());
    buf.put_u32((4 + body_size) as u32);
    put_body(&mut buf);
    debug_assert_eq!(buf.len(), HEADER_LEN + body_size, "body_size mismatch");
    buf.freeze()
}

pub(crate) fn put_cstr(buf: &mut BytesMut, value: &str) {
    buf.extend_from_slice(value.as_bytes());
    buf.put_u8(0);
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 1024;

    #[test]
    fn full_frame() {
        let frame = [b'C', 0, 0, 0, 5, 2];
        let header = peek_frame(&frame, MAX).unwrap().expect("expected frame");
        assert_eq!(header.message_type, MessageType::Control);
        assert_eq!(header.len, 5);
        assert_eq!(header.total_len, 6);
        assert_eq!(header.body_len(), 1);
    }

    #[test]
    fn waits_for_header() {
        assert_eq!(peek_frame(&[], MAX), Ok(None));
        assert_eq!(peek_frame(&[b'C', 0, 0], MAX), Ok(None));
    }

    #[test]
    fn waits_for_body() {
        let frame = [b'C', 0, 0, 0, 5];
        assert_eq!(peek_frame(&frame, MAX), Ok(None));
    }

    #[test]
    fn rejects_unknown_tag_immediately() {
        assert_eq!(peek_frame(&[b'Z'], MAX), Err(FrameError::UnknownTag(b'Z')));
    }

    #[test]
    fn rejects_invalid_length() {
        let frame = [b'C', 0, 0, 0, 3, 2];
        assert_eq!(peek_frame(&frame, MAX), Err(FrameError::InvalidLength(3)));
    }

    #[test]
    fn rejects_oversized_before_body_arrives() {
        let frame = [b'E', 0, 0, 0x10, 0];
        assert_eq!(
            peek_frame(&frame, MAX),
            Err(FrameError::TooLarge {
                len: 4097,
                max: MAX
            })
        );
    }

    #[test]
    fn peeks_only_the_first_of_two_frames() {
        let frames = [b'C', 0, 0, 0, 5, 2, b'C', 0, 0, 0, 5, 3];
        let header = peek_frame(&frames, MAX).unwrap().unwrap();
        assert_eq!(header.total_len, 6);
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
