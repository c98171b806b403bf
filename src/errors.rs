use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::shared_types::{ConnectionKey, ConnectionStatus, CorrelationId};

// -----------------------------------------------------------------------------
// ----- GatewayError ----------------------------------------------------------

/// Failure kinds surfaced by the registry, reactor and receptor service.
///
/// Cloneable so a single cause (a connection closing, a teardown) can be
/// handed to every waiter it affects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("no live session for {key}")]
    TargetNotConnected { key: ConnectionKey },

    #[error("outbound buffer for {key} is full")]
    Backpressure { key: ConnectionKey },

    #[error("request {correlation_id} timed out")]
    TimedOut { correlation_id: CorrelationId },

    #[error("session {key} closed while the request was pending")]
    ConnectionLost { key: ConnectionKey },

    #[error("protocol error: {reason}")]
    ProtocolError { reason: String },

    #[error("correlation id {correlation_id} is already pending")]
    DuplicateCorrelationId { correlation_id: CorrelationId },

    #[error("session {key} is {status}, expected active")]
    InvalidState {
        key: ConnectionKey,
        status: ConnectionStatus,
    },

    #[error("job rejected before dispatch: {reason}")]
    InvalidJob { reason: String },

    #[error("gateway is shutting down")]
    ShuttingDown,
}

// -----------------------------------------------------------------------------
// ----- GatewayError: Public --------------------------------------------------

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::TargetNotConnected { .. } => ErrorKind::TargetNotConnected,
            GatewayError::Backpressure { .. } => ErrorKind::Backpressure,
            GatewayError::TimedOut { .. } => ErrorKind::TimedOut,
            GatewayError::ConnectionLost { .. } => ErrorKind::ConnectionLost,
            GatewayError::ProtocolError { .. } => ErrorKind::ProtocolError,
            GatewayError::DuplicateCorrelationId { .. } => ErrorKind::DuplicateCorrelationId,
            GatewayError::InvalidState { .. } => ErrorKind::InvalidState,
            GatewayError::InvalidJob { .. } => ErrorKind::InvalidJob,
            GatewayError::ShuttingDown => ErrorKind::ShuttingDown,
        }
    }

    /// Whether the same job may reasonably be submitted again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Backpressure | ErrorKind::TimedOut | ErrorKind::ConnectionLost
        )
    }
}

// -----------------------------------------------------------------------------
// ----- ErrorKind -------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TargetNotConnected,
    Backpressure,
    TimedOut,
    ConnectionLost,
    ProtocolError,
    DuplicateCorrelationId,
    InvalidState,
    InvalidJob,
    ShuttingDown,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::TargetNotConnected => "target_not_connected",
            ErrorKind::Backpressure => "backpressure",
            ErrorKind::TimedOut => "timed_out",
            ErrorKind::ConnectionLost => "connection_lost",
            ErrorKind::ProtocolError => "protocol_error",
            ErrorKind::DuplicateCorrelationId => "duplicate_correlation_id",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::InvalidJob => "invalid_job",
            ErrorKind::ShuttingDown => "shutting_down",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
