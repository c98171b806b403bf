//! gateway/connection.rs
//!
//! One live agent session. The Connection owns the bounded outbound buffer
//! feeding its writer task and the status state machine
//! `Connecting -> Active -> Draining -> Closed`. Every path into `Closed`
//! goes through [`Connection::close`], which tears down the transport,
//! unregisters the session and cancels its pending requests.

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::{
    fmt,
    sync::{Arc, Weak},
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tokio::{io::AsyncWrite, sync::watch, time::Instant};
use tracing::{debug, info, warn};

use crate::analytics;
use crate::config::GatewaySettings;
use crate::errors::GatewayError;
use crate::net::{OutboundSender, PushError, WriterExit, outbound_channel, spawn_writer_task};
use crate::shared_types::{ConnectionId, ConnectionKey, ConnectionStatus};
use crate::wire_protocol::ControlFrame;

use super::{reactor::ResponseReactor, registry::ConnectionRegistry};

// -----------------------------------------------------------------------------
// ----- CloseReason -----------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// A newer session registered under the same key.
    Replaced,
    TransportError,
    ProtocolError,
    /// Graceful drain finished flushing.
    Drained,
    PeerClosed,
    LivenessTimeout,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::Replaced => "replaced",
            CloseReason::TransportError => "transport_error",
            CloseReason::ProtocolError => "protocol_error",
            CloseReason::Drained => "drained",
            CloseReason::PeerClosed => "peer_closed",
            CloseReason::LivenessTimeout => "liveness_timeout",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// -----------------------------------------------------------------------------
// ----- SessionInfo -----------------------------------------------------------

/// What the handshake established about the agent on the other end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub key: ConnectionKey,
    pub agent_version: String,
    pub peer: String,
}

/// Serialisable view of a Connection for the management surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionSnapshot {
    pub id: ConnectionId,
    pub account: String,
    pub node_id: String,
    pub agent_version: String,
    pub peer: String,
    pub status: ConnectionStatus,
    pub connected_at_unix: u64,
    pub queued_frames: usize,
}

// -----------------------------------------------------------------------------
// ----- Connection ------------------------------------------------------------

#[derive(Debug)]
struct ConnectionState {
    status: ConnectionStatus,
    last_seen: Instant,
    close_reason: Option<CloseReason>,
    // None once draining or closed; dropping it lets the writer finish
    outbound: Option<OutboundSender>,
}

#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    info: SessionInfo,
    connected_at: SystemTime,

    state: Mutex<ConnectionState>,
    shutdown: watch::Sender<bool>,

    reactor: Arc<ResponseReactor>,
    registry: Weak<ConnectionRegistry>,
}

// -----------------------------------------------------------------------------
// ----- Connection: Static ----------------------------------------------------

impl Connection {
    /// Create a `Connecting` session around the write half of a transport
    /// and start its writer task. The writer's exit feeds back into
    /// [`Connection::close`].
    pub fn open<W>(
        info: SessionInfo,
        writer: W,
        settings: &GatewaySettings,
        reactor: Arc<ResponseReactor>,
        registry: Weak<ConnectionRegistry>,
    ) -> Arc<Connection>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (tx, rx) = outbound_channel(settings.outbound_buffer_capacity);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let connection = Arc::new(Connection {
            id: ConnectionId::next(),
            info,
            connected_at: SystemTime::now(),
            state: Mutex::new(ConnectionState {
                status: ConnectionStatus::Connecting,
                last_seen: Instant::now(),
                close_reason: None,
                outbound: Some(tx),
            }),
            shutdown,
            reactor,
            registry,
        });

        let writer = spawn_writer_task(writer, rx, shutdown_rx, settings.write_wait);
        let weak = Arc::downgrade(&connection);

        tokio::spawn(async move {
            let exit = match writer.await {
                Ok(exit) => exit,
                Err(e) => WriterExit::Failed(std::io::Error::other(e)),
            };

            let Some(connection) = weak.upgrade() else {
                return;
            };

            match exit {
                WriterExit::Drained => {
                    connection.close(CloseReason::Drained);
                }
                WriterExit::Shutdown => {}
                WriterExit::TimedOut => {
                    warn!("{} write stalled past write_wait", connection);
                    connection.close(CloseReason::TransportError);
                }
                WriterExit::Failed(e) => {
                    warn!("{} write failed: {e}", connection);
                    connection.close(CloseReason::TransportError);
                }
            }
        });

        connection
    }
}

// -----------------------------------------------------------------------------
// ----- Connection: Public ----------------------------------------------------

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn key(&self) -> &ConnectionKey {
        &self.info.key
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.lock().status
    }

    pub fn is_active(&self) -> bool {
        self.status() == ConnectionStatus::Active
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.state.lock().close_reason
    }

    pub fn last_seen(&self) -> Instant {
        self.state.lock().last_seen
    }

    /// Record inbound traffic for liveness.
    pub fn touch(&self) {
        self.state.lock().last_seen = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_seen().elapsed()
    }

    /// Handshake finished: start accepting traffic in both directions.
    pub fn activate(&self) -> Result<(), GatewayError> {
        let mut state = self.state.lock();
        if !state.status.can_transition_to(ConnectionStatus::Active) {
            return Err(GatewayError::InvalidState {
                key: self.info.key.clone(),
                status: state.status,
            });
        }

        state.status = ConnectionStatus::Active;
        Ok(())
    }

    /// Queue an encoded frame for the writer. Never waits: a full buffer is
    /// `Backpressure`, a session that stopped accepting frames is
    /// `ConnectionLost`.
    pub fn send(&self, frame: Bytes) -> Result<(), GatewayError> {
        let state = self.state.lock();

        match state.status {
            ConnectionStatus::Active => {}
            ConnectionStatus::Connecting => {
                return Err(GatewayError::InvalidState {
                    key: self.info.key.clone(),
                    status: state.status,
                });
            }
            ConnectionStatus::Draining | ConnectionStatus::Closed => {
                return Err(self.connection_lost());
            }
        }

        let Some(outbound) = state.outbound.as_ref() else {
            return Err(self.connection_lost());
        };

        match outbound.try_push(frame) {
            Ok(()) => Ok(()),
            Err(PushError::Full(_)) => {
                analytics::inc_backpressure_rejections();
                debug!("{} outbound buffer full", self);
                Err(GatewayError::Backpressure {
                    key: self.info.key.clone(),
                })
            }
            Err(PushError::Closed(_)) => Err(self.connection_lost()),
        }
    }

    /// Graceful close: stop accepting frames, tell the agent, flush what is
    /// queued, then close. Returns false when the session was not active.
    pub fn drain(&self) -> bool {
        let outbound = {
            let mut state = self.state.lock();
            if !state.status.can_transition_to(ConnectionStatus::Draining) {
                return false;
            }

            state.status = ConnectionStatus::Draining;
            state.outbound.take()
        };

        info!("{} draining", self);

        if let Some(outbound) = outbound {
            if outbound.try_push(ControlFrame::disconnect()).is_err() {
                debug!("{} no room for disconnect notice", self);
            }
            // last sender gone: the writer flushes and reports Drained
            drop(outbound);
        }

        true
    }

    /// Transition to `Closed`. Idempotent; returns whether this call did the
    /// transition.
    pub fn close(&self, reason: CloseReason) -> bool {
        let outbound = {
            let mut state = self.state.lock();
            if state.status == ConnectionStatus::Closed {
                return false;
            }

            state.status = ConnectionStatus::Closed;
            state.close_reason = Some(reason);
            state.outbound.take()
        };

        // transport first, so nothing new reaches the agent
        drop(outbound);
        self.shutdown.send_replace(true);

        let cancelled =
            self.reactor
                .cancel_connection(&self.info.key, self.id, self.connection_lost());

        // an evicted session is removed by the registry that replaced it
        if reason != CloseReason::Replaced {
            if let Some(registry) = self.registry.upgrade() {
                registry.unregister(&self.info.key, self);
            }
        }

        analytics::inc_connections_closed();
        info!("{} closed ({reason}), {cancelled} pending request(s) cancelled", self);

        true
    }

    /// Resolves once the session is closed.
    pub async fn closed(&self) {
        let mut rx = self.shutdown.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        let state = self.state.lock();

        ConnectionSnapshot {
            id: self.id,
            account: self.info.key.account.clone(),
            node_id: self.info.key.node_id.clone(),
            agent_version: self.info.agent_version.clone(),
            peer: self.info.peer.clone(),
            status: state.status,
            connected_at_unix: self
                .connected_at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            queued_frames: state.outbound.as_ref().map_or(0, |o| o.queued()),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Connection: Private ---------------------------------------------------

impl Connection {
    fn connection_lost(&self) -> GatewayError {
        GatewayError::ConnectionLost {
            key: self.info.key.clone(),
        }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.info.key, self.id)
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::shared_types::CorrelationId;
    use crate::wire_protocol::{ControlCode, ProtocolMessage, peek_frame};
    use bytes::BytesMut;
    use tokio::io::{AsyncReadExt, DuplexStream};

    fn info() -> SessionInfo {
        SessionInfo {
            key: ConnectionKey::new("1234", "345"),
            agent_version: "1.0.0".to_string(),
            peer: "test".to_string(),
        }
    }

    fn settings(capacity: usize) -> GatewaySettings {
        GatewaySettings {
            outbound_buffer_capacity: capacity,
            ..GatewaySettings::default()
        }
    }

    fn open(capacity: usize) -> (Arc<Connection>, Arc<ResponseReactor>, DuplexStream) {
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let reactor = Arc::new(ResponseReactor::new());
        let connection = Connection::open(
            info(),
            ours,
            &settings(capacity),
            reactor.clone(),
            Weak::new(),
        );
        (connection, reactor, theirs)
    }

    async fn read_message(agent: &mut DuplexStream, inbox: &mut BytesMut) -> ProtocolMessage {
        loop {
            if let Some(header) = peek_frame(inbox, 1 << 20).unwrap() {
                if inbox.len() >= header.total_len {
                    let frame = inbox.split_to(header.total_len).freeze();
                    return ProtocolMessage::decode(frame).unwrap();
                }
            }
            let n = agent.read_buf(inbox).await.unwrap();
            assert!(n > 0, "gateway closed before a full frame arrived");
        }
    }

    #[tokio::test]
    async fn send_requires_active() {
        let (connection, _reactor, _agent) = open(4);

        let err = connection.send(ControlFrame::ping()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        connection.activate().unwrap();
        connection.send(ControlFrame::ping()).unwrap();
    }

    #[tokio::test]
    async fn frames_reach_the_transport_in_order() {
        let (connection, _reactor, mut agent) = open(4);
        connection.activate().unwrap();

        connection.send(ControlFrame::ping()).unwrap();
        connection.send(ControlFrame::pong()).unwrap();

        let mut inbox = BytesMut::new();
        let first = read_message(&mut agent, &mut inbox).await;
        let second = read_message(&mut agent, &mut inbox).await;

        assert!(matches!(first, ProtocolMessage::Control(f) if f.code == ControlCode::Ping));
        assert!(matches!(second, ProtocolMessage::Control(f) if f.code == ControlCode::Pong));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn full_buffer_is_backpressure() {
        // current_thread: the writer task cannot run between the sends
        let (connection, _reactor, _agent) = open(2);
        connection.activate().unwrap();

        connection.send(ControlFrame::ping()).unwrap();
        connection.send(ControlFrame::ping()).unwrap();

        let err = connection.send(ControlFrame::ping()).unwrap_err();
        assert_eq!(
            err,
            GatewayError::Backpressure {
                key: ConnectionKey::new("1234", "345")
            }
        );
        assert!(connection.is_active());
    }

    #[tokio::test]
    async fn close_cancels_pending_with_connection_lost() {
        let (connection, reactor, _agent) = open(4);
        connection.activate().unwrap();

        let waiter = reactor
            .register(
                CorrelationId(1),
                connection.key().clone(),
                connection.id(),
                Duration::from_secs(30),
            )
            .unwrap();

        assert!(connection.close(CloseReason::TransportError));
        assert!(!connection.close(CloseReason::TransportError));

        assert_eq!(waiter.await.unwrap_err().kind(), ErrorKind::ConnectionLost);
        assert_eq!(connection.status(), ConnectionStatus::Closed);
        assert_eq!(connection.close_reason(), Some(CloseReason::TransportError));
        assert_eq!(
            connection.send(ControlFrame::ping()).unwrap_err().kind(),
            ErrorKind::ConnectionLost
        );
    }

    #[tokio::test]
    async fn drain_flushes_then_closes() {
        let (connection, _reactor, mut agent) = open(4);
        connection.activate().unwrap();
        connection.send(ControlFrame::ping()).unwrap();

        assert!(connection.drain());
        assert_eq!(
            connection.send(ControlFrame::ping()).unwrap_err().kind(),
            ErrorKind::ConnectionLost
        );

        let mut inbox = BytesMut::new();
        let queued = read_message(&mut agent, &mut inbox).await;
        let notice = read_message(&mut agent, &mut inbox).await;
        assert!(matches!(queued, ProtocolMessage::Control(f) if f.code == ControlCode::Ping));
        assert!(
            matches!(notice, ProtocolMessage::Control(f) if f.code == ControlCode::Disconnect)
        );

        connection.closed().await;
        assert_eq!(connection.close_reason(), Some(CloseReason::Drained));
    }

    #[tokio::test]
    async fn broken_transport_closes_connection() {
        let (connection, _reactor, agent) = open(4);
        connection.activate().unwrap();
        drop(agent);

        connection.send(ControlFrame::ping()).unwrap();
        connection.closed().await;

        assert_eq!(connection.close_reason(), Some(CloseReason::TransportError));
    }

    #[tokio::test]
    async fn snapshot_reports_identity() {
        let (connection, _reactor, _agent) = open(4);
        connection.activate().unwrap();

        let snapshot = connection.snapshot();
        assert_eq!(snapshot.account, "1234");
        assert_eq!(snapshot.node_id, "345");
        assert_eq!(snapshot.status, ConnectionStatus::Active);
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
