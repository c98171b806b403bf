use bytes::{Bytes, BytesMut};
use std::time::Duration;
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    time::timeout,
};

use crate::errors::GatewayError;
use crate::wire_protocol::{FrameError, HandshakeFrame, MessageType, ProtocolMessage, peek_frame};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const HANDSHAKE_READ_HINT: usize = 512;

// -----------------------------------------------------------------------------
// ----- HandshakeError --------------------------------------------------------

/// Why a socket never became a registered session.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("no handshake within {0:?}")]
    TimedOut(Duration),

    #[error("peer closed before completing the handshake")]
    PeerClosed,

    #[error("transport error during handshake: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed handshake: {0}")]
    Frame(#[from] FrameError),

    #[error("expected a handshake frame, got {0:?}")]
    UnexpectedMessage(MessageType),

    #[error("handshake is missing the account or node id")]
    IncompleteIdentity,

    #[error("session refused: {0}")]
    Registration(#[from] GatewayError),
}

// -----------------------------------------------------------------------------
// ----- Handshake -------------------------------------------------------------

/// Read the opening frame of a session. It must arrive within `deadline` and
/// be a Handshake naming both account and node id. Bytes that arrive behind
/// it stay in `inbox` for the dispatcher.
pub async fn read_handshake<R>(
    reader: &mut R,
    inbox: &mut BytesMut,
    max_frame_size: usize,
    deadline: Duration,
) -> Result<HandshakeFrame, HandshakeError>
where
    R: AsyncRead + Unpin,
{
    let frame = timeout(deadline, read_first_frame(reader, inbox, max_frame_size))
        .await
        .map_err(|_| HandshakeError::TimedOut(deadline))??;

    let hello = match ProtocolMessage::decode(frame)? {
        ProtocolMessage::Handshake(hello) => hello,
        other => return Err(HandshakeError::UnexpectedMessage(other.message_type())),
    };

    if !hello.key().is_complete() {
        return Err(HandshakeError::IncompleteIdentity);
    }

    Ok(hello)
}

async fn read_first_frame<R>(
    reader: &mut R,
    inbox: &mut BytesMut,
    max_frame_size: usize,
) -> Result<Bytes, HandshakeError>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(header) = peek_frame(inbox, max_frame_size)? {
            return Ok(inbox.split_to(header.total_len).freeze());
        }

        inbox.reserve(HANDSHAKE_READ_HINT);
        if reader.read_buf(inbox).await? == 0 {
            return Err(HandshakeError::PeerClosed);
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
