use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::wire_protocol::{MessageType, WireSerializable, frame::FrameError};

// -----------------------------------------------------------------------------
// ----- ControlCode -----------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCode {
    HandshakeOk, // 1, gateway -> agent
    Ping,        // 2
    Pong,        // 3
    Disconnect,  // 4, graceful close request
}

impl ControlCode {
    pub fn as_u8(self) -> u8 {
        match self {
            ControlCode::HandshakeOk => 1,
            ControlCode::Ping => 2,
            ControlCode::Pong => 3,
            ControlCode::Disconnect => 4,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(ControlCode::HandshakeOk),
            2 => Some(ControlCode::Ping),
            3 => Some(ControlCode::Pong),
            4 => Some(ControlCode::Disconnect),
            _ => None,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- ControlFrame ----------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlFrame {
    pub code: ControlCode,
}

impl ControlFrame {
    pub fn new(code: ControlCode) -> Self {
        Self { code }
    }

    pub fn handshake_ok() -> Bytes {
        Self::new(ControlCode::HandshakeOk).to_bytes()
    }

    pub fn ping() -> Bytes {
        Self::new(ControlCode::Ping).to_bytes()
    }

    pub fn pong() -> Bytes {
        Self::new(ControlCode::Pong).to_bytes()
    }

    pub fn disconnect() -> Bytes {
        Self::new(ControlCode::Disconnect).to_bytes()
    }
}

impl WireSerializable for ControlFrame {
    const MESSAGE_TYPE: MessageType = MessageType::Control;

    fn body_size(&self) -> usize {
        1
    }

    fn put_body(&self, buf: &mut BytesMut) {
        buf.put_u8(self.code.as_u8());
    }

    fn from_body(mut body: Bytes) -> Result<Self, FrameError> {
        if body.is_empty() {
            return Err(FrameError::Truncated("control"));
        }

        let raw = body.get_u8();
        if body.has_remaining() {
            return Err(FrameError::TrailingBytes("control"));
        }

        let code = ControlCode::from_u8(raw).ok_or(FrameError::UnknownControlCode(raw))?;
        Ok(Self { code })
    }
}
