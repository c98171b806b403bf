use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::shared_types::{CorrelationId, JobResponse, ResponseStatus};
use crate::wire_protocol::{MessageType, WireSerializable, frame::FrameError};

// -----------------------------------------------------------------------------
// ----- ResponseFrame ---------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub correlation_id: CorrelationId,
    pub status: ResponseStatus,
    pub payload: Bytes,
}

impl ResponseFrame {
    pub fn new(correlation_id: CorrelationId, status: ResponseStatus, payload: impl Into<Bytes>) -> Self {
        Self {
            correlation_id,
            status,
            payload: payload.into(),
        }
    }

    pub fn into_job_response(self) -> JobResponse {
        JobResponse {
            correlation_id: self.correlation_id,
            status: self.status,
            payload: self.payload,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- ResponseFrame: WireSerializable ---------------------------------------

impl WireSerializable for ResponseFrame {
    const MESSAGE_TYPE: MessageType = MessageType::Response;

    fn body_size(&self) -> usize {
        8 + 1 + self.payload.len()
    }

    fn put_body(&self, buf: &mut BytesMut) {
        buf.put_u64(self.correlation_id.0);
        buf.put_u8(self.status.as_u8());
        buf.extend_from_slice(&self.payload);
    }

    fn from_body(mut body: Bytes) -> Result<Self, FrameError> {
        if body.len() < 9 {
            return Err(FrameError::Truncated("response"));
        }

        let correlation_id = CorrelationId(body.get_u64());
        let raw_status = body.get_u8();
        let status = ResponseStatus::from_u8(raw_status).ok_or(FrameError::UnknownStatus(raw_status))?;

        Ok(Self {
            correlation_id,
            status,
            payload: body,
        })
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_failed_status() {
        let frame = ResponseFrame::new(CorrelationId(9), ResponseStatus::Failed, "boom");
        let decoded = ResponseFrame::from_bytes(frame.to_bytes()).unwrap();
        assert_eq!(decoded.status, ResponseStatus::Failed);
        assert_eq!(&decoded.payload[..], b"boom");
    }

    #[test]
    fn unknown_status() {
        let mut body = BytesMut::new();
        body.put_u64(1);
        body.put_u8(9);
        assert_eq!(
            ResponseFrame::from_body(body.freeze()),
            Err(FrameError::UnknownStatus(9))
        );
    }

    #[test]
    fn missing_status_byte() {
        let mut body = BytesMut::new();
        body.put_u64(1);
        assert_eq!(
            ResponseFrame::from_body(body.freeze()),
            Err(FrameError::Truncated("response"))
        );
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
