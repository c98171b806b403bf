use bytes::Bytes;
use serde::Serialize;

use super::CorrelationId;

// -----------------------------------------------------------------------------
// ----- Job -------------------------------------------------------------------

/// Work addressed to a remote agent: a directive naming the handler on the
/// agent side plus an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub directive: String,
    pub payload: Bytes,
}

impl Job {
    pub fn new(directive: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            directive: directive.into(),
            payload: payload.into(),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- JobResponse -----------------------------------------------------------

/// Outcome reported by the agent. A `Failed` status is still a correlated
/// response, not a gateway error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Failed,
}

impl ResponseStatus {
    pub fn as_u8(self) -> u8 {
        match self {
            ResponseStatus::Ok => 0,
            ResponseStatus::Failed => 1,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ResponseStatus::Ok),
            1 => Some(ResponseStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResponse {
    pub correlation_id: CorrelationId,
    pub status: ResponseStatus,
    pub payload: Bytes,
}
