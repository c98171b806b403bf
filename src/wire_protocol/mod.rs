//! Agent wire protocol: tagged, length-prefixed frames.
//!
//! `tag: u8 | len: u32 BE (self + body) | body`. Strings inside bodies are
//! NUL-terminated UTF-8.

pub mod frame;
pub mod frames;
pub mod message_type;
pub mod protocol_message;
pub mod read_cstr;
pub mod wire_serializable;

pub use frame::{FrameError, FrameHeader, HEADER_LEN, peek_frame};
pub use frames::{ControlCode, ControlFrame, EventFrame, HandshakeFrame, JobRequestFrame, ResponseFrame};
pub use message_type::MessageType;
pub use protocol_message::ProtocolMessage;
pub use wire_serializable::WireSerializable;
