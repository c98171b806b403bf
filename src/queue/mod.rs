//! Contract with the external message bus: publishing gateway records and
//! consuming externally originated jobs.

pub mod consumer;
pub mod publisher;

pub use consumer::{JobConsumer, JobMessage, JobOutcome};
pub use publisher::{
    ChannelPublisher, LocalBus, LoggingPublisher, QueueError, QueuePublisher, QueueRecord, publish_detached,
};

use bytes::Bytes;
use serde_json::Value;

/// Embed an agent payload in a JSON envelope: as-is when it already is
/// JSON, as a (lossy) string otherwise.
pub fn payload_to_json(payload: &Bytes) -> Value {
    if payload.is_empty() {
        return Value::Null;
    }

    serde_json::from_slice(payload)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(payload).into_owned()))
}

/// Inverse of [`payload_to_json`] for job submissions: strings travel as
/// their raw text, everything else as encoded JSON.
pub fn json_to_payload(value: &Value) -> Bytes {
    match value {
        Value::Null => Bytes::new(),
        Value::String(s) => Bytes::from(s.clone()),
        other => Bytes::from(other.to_string()),
    }
}
