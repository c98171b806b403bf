pub mod connection_id;
pub mod connection_key;
pub mod connection_status;
pub mod correlation_id;
pub mod job;

pub use connection_id::ConnectionId;
pub use connection_key::ConnectionKey;
pub use connection_status::ConnectionStatus;
pub use correlation_id::{CorrelationId, CorrelationIdGenerator};
pub use job::{Job, JobResponse, ResponseStatus};
