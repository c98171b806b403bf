use bytes::{Bytes, BytesMut};

use super::{
    MessageType,
    frame::{FrameError, HEADER_LEN, encode, peek_frame},
};

/// A frame type with a fixed tag and a body codec.
///
/// Implementors only describe the body; the tag and length prefix are
/// handled here so every frame is framed identically.
pub trait WireSerializable: Sized {
    const MESSAGE_TYPE: MessageType;

    /// Size of the body of the message, excluding tag and length.
    fn body_size(&self) -> usize;

    /// Append the body to `buf`.
    fn put_body(&self, buf: &mut BytesMut);

    /// Deserialize from a body with tag and length already stripped.
    fn from_body(body: Bytes) -> Result<Self, FrameError>;

    /// Serialize the object into a complete frame for wire transmission.
    fn to_bytes(&self) -> Bytes {
        encode(Self::MESSAGE_TYPE, self.body_size(), |buf| self.put_body(buf))
    }

    /// Deserialize from exactly one complete frame.
    fn from_bytes(frame: Bytes) -> Result<Self, FrameError> {
        let header = peek_frame(&frame, usize::MAX)?.ok_or(FrameError::Truncated("frame"))?;

        if header.message_type != Self::MESSAGE_TYPE {
            return Err(FrameError::UnexpectedType {
                expected: Self::MESSAGE_TYPE,
                found: header.message_type,
            });
        }

        if frame.len() != header.total_len {
            return Err(FrameError::TrailingBytes("frame"));
        }

        Self::from_body(frame.slice(HEADER_LEN..))
    }
}
