//! Module: wire_protocol::frames::handshake
//!
//! First frame an agent sends after the transport opens. Identifies the
//! session as `(account, node_id)`; identity itself has already been
//! established by the accept path.

use bytes::{Bytes, BytesMut};

use crate::shared_types::ConnectionKey;
use crate::wire_protocol::{
    MessageType, WireSerializable,
    frame::{FrameError, put_cstr},
    read_cstr::read_cstr,
};

// -----------------------------------------------------------------------------
// ----- HandshakeFrame --------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeFrame {
    pub account: String,
    pub node_id: String,
    pub agent_version: String,
}

impl HandshakeFrame {
    pub fn new(
        account: impl Into<String>,
        node_id: impl Into<String>,
        agent_version: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            node_id: node_id.into(),
            agent_version: agent_version.into(),
        }
    }

    pub fn key(&self) -> ConnectionKey {
        ConnectionKey::new(self.account.clone(), self.node_id.clone())
    }
}

// -----------------------------------------------------------------------------
// ----- HandshakeFrame: WireSerializable --------------------------------------

impl WireSerializable for HandshakeFrame {
    const MESSAGE_TYPE: MessageType = MessageType::Handshake;

    fn body_size(&self) -> usize {
        self.account.len() + 1 + self.node_id.len() + 1 + self.agent_version.len() + 1
    }

    fn put_body(&self, buf: &mut BytesMut) {
        put_cstr(buf, &self.account);
        put_cstr(buf, &self.node_id);
        put_cstr(buf, &self.agent_version);
    }

    fn from_body(body: Bytes) -> Result<Self, FrameError> {
        let mut cursor: &[u8] = &body;

        let account = read_cstr(&mut cursor)?.to_string();
        let node_id = read_cstr(&mut cursor)?.to_string();
        let agent_version = read_cstr(&mut cursor)?.to_string();

        if !cursor.is_empty() {
            return Err(FrameError::TrailingBytes("handshake"));
        }

        Ok(Self {
            account,
            node_id,
            agent_version,
        })
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
