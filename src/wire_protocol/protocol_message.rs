use bytes::Bytes;

use super::{
    ControlFrame, EventFrame, FrameError, HandshakeFrame, JobRequestFrame, MessageType,
    ResponseFrame, WireSerializable, frame::HEADER_LEN, peek_frame,
};

// -----------------------------------------------------------------------------
// ----- ProtocolMessage -------------------------------------------------------

/// Any frame of the agent protocol, decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolMessage {
    Handshake(HandshakeFrame),
    JobRequest(JobRequestFrame),
    Response(ResponseFrame),
    Event(EventFrame),
    Control(ControlFrame),
}

// -----------------------------------------------------------------------------
// ----- ProtocolMessage: Static -----------------------------------------------

impl ProtocolMessage {
    /// Decode exactly one complete frame. Partial frames are an error here;
    /// callers buffer with [`peek_frame`] first.
    pub fn decode(frame: Bytes) -> Result<Self, FrameError> {
        let header = peek_frame(&frame, usize::MAX)?.ok_or(FrameError::Truncated("frame"))?;

        if frame.len() != header.total_len {
            return Err(FrameError::TrailingBytes("frame"));
        }

        let body = frame.slice(HEADER_LEN..);

        let message = match header.message_type {
            MessageType::Handshake => Self::Handshake(HandshakeFrame::from_body(body)?),
            MessageType::JobRequest => Self::JobRequest(JobRequestFrame::from_body(body)?),
            MessageType::Response => Self::Response(ResponseFrame::from_body(body)?),
            MessageType::Event => Self::Event(EventFrame::from_body(body)?),
            MessageType::Control => Self::Control(ControlFrame::from_body(body)?),
        };

        Ok(message)
    }
}

// -----------------------------------------------------------------------------
// ----- ProtocolMessage: Public -----------------------------------------------

impl ProtocolMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Handshake(_) => MessageType::Handshake,
            Self::JobRequest(_) => MessageType::JobRequest,
            Self::Response(_) => MessageType::Response,
            Self::Event(_) => MessageType::Event,
            Self::Control(_) => MessageType::Control,
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        match self {
            Self::Handshake(f) => f.to_bytes(),
            Self::JobRequest(f) => f.to_bytes(),
            Self::Response(f) => f.to_bytes(),
            Self::Event(f) => f.to_bytes(),
            Self::Control(f) => f.to_bytes(),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
