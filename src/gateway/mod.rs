//! Connection registry, protocol dispatch and response correlation.

pub mod connection;
pub mod controller;
pub mod dispatcher;
#[allow(clippy::module_inception)]
pub mod gateway;
pub mod handshake;
pub mod reactor;
pub mod receptor;
pub mod registry;

pub use connection::{CloseReason, Connection, ConnectionSnapshot, SessionInfo};
pub use controller::ReceptorController;
pub use dispatcher::MessageDispatcher;
pub use gateway::Gateway;
pub use handshake::{HandshakeError, read_handshake};
pub use reactor::{JobResult, ResponseReactor, Waiter};
pub use receptor::ReceptorService;
pub use registry::ConnectionRegistry;
