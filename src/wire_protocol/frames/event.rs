use bytes::{Bytes, BytesMut};

use crate::wire_protocol::{
    MessageType, WireSerializable,
    frame::{FrameError, put_cstr},
    read_cstr::read_cstr,
};

// -----------------------------------------------------------------------------
// ----- EventFrame ------------------------------------------------------------

/// Unsolicited work or notification originating from the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFrame {
    pub directive: String,
    pub payload: Bytes,
}

impl EventFrame {
    pub fn new(directive: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            directive: directive.into(),
            payload: payload.into(),
        }
    }
}

impl WireSerializable for EventFrame {
    const MESSAGE_TYPE: MessageType = MessageType::Event;

    fn body_size(&self) -> usize {
        self.directive.len() + 1 + self.payload.len()
    }

    fn put_body(&self, buf: &mut BytesMut) {
        put_cstr(buf, &self.directive);
        buf.extend_from_slice(&self.payload);
    }

    fn from_body(mut body: Bytes) -> Result<Self, FrameError> {
        let mut cursor: &[u8] = &body;
        let directive = read_cstr(&mut cursor)?.to_string();

        if directive.is_empty() {
            return Err(FrameError::EmptyField("event directive"));
        }

        let consumed = body.len() - cursor.len();
        let payload = body.split_off(consumed);

        Ok(Self { directive, payload })
    }
}
