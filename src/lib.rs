pub mod admin;
pub mod analytics;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod net;
pub mod queue;
pub mod shared_types;
pub mod tls;
pub mod wire_protocol;

pub use config::Config;
pub use errors::{ErrorKind, GatewayError};
pub use gateway::{Gateway, ReceptorController, ReceptorService};
pub use shared_types::{ConnectionKey, Job, JobResponse};
