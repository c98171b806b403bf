use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::shared_types::{CorrelationId, Job};
use crate::wire_protocol::{
    MessageType, WireSerializable,
    frame::{FrameError, HEADER_LEN, put_cstr},
    read_cstr::read_cstr,
};

// -----------------------------------------------------------------------------
// ----- JobRequestFrame -------------------------------------------------------

/// Job sent from the gateway to an agent. The agent echoes `correlation_id`
/// in its Response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequestFrame {
    pub correlation_id: CorrelationId,
    pub directive: String,
    pub payload: Bytes,
}

impl JobRequestFrame {
    pub fn new(correlation_id: CorrelationId, job: Job) -> Self {
        Self {
            correlation_id,
            directive: job.directive,
            payload: job.payload,
        }
    }

    /// Whether this frame can go on the wire as-is: the directive must not
    /// carry its own terminator and the whole frame must fit `max_frame_size`.
    pub fn check(&self, max_frame_size: usize) -> Result<(), FrameError> {
        if self.directive.as_bytes().contains(&0) {
            return Err(FrameError::InvalidString("directive contains NUL".to_string()));
        }

        let total_len = HEADER_LEN + self.body_size();
        if total_len > max_frame_size {
            return Err(FrameError::TooLarge {
                len: total_len,
                max: max_frame_size,
            });
        }

        Ok(())
    }
}

// -----------------------------------------------------------------------------
// ----- JobRequestFrame: WireSerializable -------------------------------------

impl WireSerializable for JobRequestFrame {
    const MESSAGE_TYPE: MessageType = MessageType::JobRequest;

    fn body_size(&self) -> usize {
        8 + self.directive.len() + 1 + self.payload.len()
    }

    fn put_body(&self, buf: &mut BytesMut) {
        buf.put_u64(self.correlation_id.0);
        put_cstr(buf, &self.directive);
        buf.extend_from_slice(&self.payload);
    }

    fn from_body(mut body: Bytes) -> Result<Self, FrameError> {
        if body.len() < 8 {
            return Err(FrameError::Truncated("job request"));
        }
        let correlation_id = CorrelationId(body.get_u64());

        let mut cursor: &[u8] = &body;
        let directive = read_cstr(&mut cursor)?.to_string();
        let consumed = body.len() - cursor.len();
        let payload = body.split_off(consumed);

        Ok(Self {
            correlation_id,
            directive,
            payload,
        })
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
