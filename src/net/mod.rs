// net/mod.rs
//! Networking layer: bounded outbound buffering and the per-connection
//! writer task. Everything in here is protocol-agnostic.

pub mod outbound;

pub use outbound::{OutboundReceiver, OutboundSender, PushError, WriterExit, outbound_channel, spawn_writer_task};
