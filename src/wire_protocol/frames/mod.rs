pub mod control;
pub mod event;
pub mod handshake;
pub mod job_request;
pub mod response;

pub use control::{ControlCode, ControlFrame};
pub use event::EventFrame;
pub use handshake::HandshakeFrame;
pub use job_request::JobRequestFrame;
pub use response::ResponseFrame;
