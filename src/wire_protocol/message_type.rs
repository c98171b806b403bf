//! Byte1 tags of the agent protocol.
//! Direction is fixed per tag; see the comments below.

// -----------------------------------------------------------------------------
// ----- MessageType -----------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Handshake,  // 'H' agent -> gateway, first frame only
    JobRequest, // 'J' gateway -> agent
    Response,   // 'R' agent -> gateway
    Event,      // 'E' agent -> gateway
    Control,    // 'C' both directions
}

// -----------------------------------------------------------------------------
// ----- MessageType: Static ---------------------------------------------------

impl MessageType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'H' => Some(MessageType::Handshake),
            b'J' => Some(MessageType::JobRequest),
            b'R' => Some(MessageType::Response),
            b'E' => Some(MessageType::Event),
            b'C' => Some(MessageType::Control),
            _ => None,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- MessageType: Public ---------------------------------------------------

impl MessageType {
    pub fn tag(self) -> u8 {
        match self {
            MessageType::Handshake => b'H',
            MessageType::JobRequest => b'J',
            MessageType::Response => b'R',
            MessageType::Event => b'E',
            MessageType::Control => b'C',
        }
    }

    /// Frames an agent is allowed to send once the session is active.
    pub fn valid_from_active_agent(self) -> bool {
        matches!(
            self,
            MessageType::Response | MessageType::Event | MessageType::Control
        )
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
