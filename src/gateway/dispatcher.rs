//! gateway/dispatcher.rs
//!
//! Per-session reader. Frames are processed strictly in arrival order; a
//! frame is only acted on once it is complete and structurally valid.

use bytes::BytesMut;
use std::{sync::Arc, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    select,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::{debug, info, warn};

use crate::analytics;
use crate::config::GatewaySettings;
use crate::wire_protocol::{ControlCode, ControlFrame, ProtocolMessage, peek_frame};

use super::{
    connection::{CloseReason, Connection},
    reactor::ResponseReactor,
    receptor::ReceptorService,
};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const READ_CAPACITY_HINT: usize = 4096;

// -----------------------------------------------------------------------------
// ----- MessageDispatcher -----------------------------------------------------

#[derive(Debug)]
pub struct MessageDispatcher<R> {
    connection: Arc<Connection>,
    reader: R,
    inbox: BytesMut,

    reactor: Arc<ResponseReactor>,
    receptor: Arc<ReceptorService>,

    max_frame_size: usize,
    ping_period: Duration,
    pong_wait: Duration,
}

enum Wake {
    Closed,
    Tick,
    Read(std::io::Result<usize>),
}

// -----------------------------------------------------------------------------
// ----- MessageDispatcher: Static ---------------------------------------------

impl<R> MessageDispatcher<R>
where
    R: AsyncRead + Unpin,
{
    /// `inbox` carries whatever was read past the handshake frame.
    pub fn new(
        connection: Arc<Connection>,
        reader: R,
        inbox: BytesMut,
        reactor: Arc<ResponseReactor>,
        receptor: Arc<ReceptorService>,
        settings: &GatewaySettings,
    ) -> Self {
        Self {
            connection,
            reader,
            inbox,
            reactor,
            receptor,
            max_frame_size: settings.max_frame_size,
            ping_period: settings.ping_period,
            pong_wait: settings.pong_wait,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- MessageDispatcher: Public ---------------------------------------------

impl<R> MessageDispatcher<R>
where
    R: AsyncRead + Unpin,
{
    /// Read until the session closes, whoever closes it. Returns the reason
    /// the session ended.
    pub async fn run(mut self) -> CloseReason {
        let mut closed = self.connection.shutdown_signal();
        let mut ping = interval_at(Instant::now() + self.ping_period, self.ping_period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        if let Err(reason) = self.process_inbox() {
            self.connection.close(reason);
        }

        loop {
            let wake = select! {
                biased;
                _ = closed.wait_for(|closed| *closed) => Wake::Closed,
                _ = ping.tick() => Wake::Tick,
                read = async {
                    self.inbox.reserve(READ_CAPACITY_HINT);
                    self.reader.read_buf(&mut self.inbox).await
                } => Wake::Read(read),
            };

            match wake {
                Wake::Closed => break,

                Wake::Tick => {
                    if let Err(reason) = self.keep_alive() {
                        self.connection.close(reason);
                    }
                }

                Wake::Read(Ok(0)) => {
                    debug!("{} peer closed the transport", self.connection);
                    self.connection.close(CloseReason::PeerClosed);
                }

                Wake::Read(Ok(_)) => {
                    self.connection.touch();
                    if let Err(reason) = self.process_inbox() {
                        self.connection.close(reason);
                    }
                }

                Wake::Read(Err(e)) => {
                    warn!("{} read failed: {e}", self.connection);
                    self.connection.close(CloseReason::TransportError);
                }
            }
        }

        let reason = self
            .connection
            .close_reason()
            .unwrap_or(CloseReason::Shutdown);
        info!("{} dispatcher stopped ({reason})", self.connection);
        reason
    }
}

// -----------------------------------------------------------------------------
// ----- MessageDispatcher: Private --------------------------------------------

impl<R> MessageDispatcher<R>
where
    R: AsyncRead + Unpin,
{
    /// Handle every complete frame in the inbox.
    fn process_inbox(&mut self) -> Result<(), CloseReason> {
        loop {
            let header = match peek_frame(&self.inbox, self.max_frame_size) {
                Ok(Some(header)) => header,
                Ok(None) => return Ok(()),
                Err(e) => return Err(self.protocol_violation(&e.to_string())),
            };

            let frame = self.inbox.split_to(header.total_len).freeze();
            let message = ProtocolMessage::decode(frame)
                .map_err(|e| self.protocol_violation(&e.to_string()))?;

            self.handle(message)?;
        }
    }

    fn handle(&mut self, message: ProtocolMessage) -> Result<(), CloseReason> {
        match message {
            ProtocolMessage::Response(frame) => {
                self.reactor.resolve(frame.into_job_response());
            }

            ProtocolMessage::Event(frame) => {
                self.receptor
                    .handle_inbound_event(self.connection.key(), frame);
            }

            ProtocolMessage::Control(frame) => match frame.code {
                ControlCode::Ping => {
                    if let Err(e) = self.connection.send(ControlFrame::pong()) {
                        debug!("{} pong not sent: {e}", self.connection);
                    }
                }
                ControlCode::Pong => {}
                ControlCode::Disconnect => {
                    info!("{} agent requested disconnect", self.connection);
                    self.connection.drain();
                }
                ControlCode::HandshakeOk => {
                    return Err(self.protocol_violation("agent sent HandshakeOk"));
                }
            },

            other => {
                let reason = format!("{:?} frame is not valid from an agent", other.message_type());
                return Err(self.protocol_violation(&reason));
            }
        }

        Ok(())
    }

    fn keep_alive(&self) -> Result<(), CloseReason> {
        let idle = self.connection.idle_for();
        if idle > self.pong_wait {
            warn!("{} silent for {idle:?}, closing", self.connection);
            return Err(CloseReason::LivenessTimeout);
        }

        if self.connection.is_active() {
            if let Err(e) = self.connection.send(ControlFrame::ping()) {
                debug!("{} ping not sent: {e}", self.connection);
            }
        }

        Ok(())
    }

    fn protocol_violation(&self, reason: &str) -> CloseReason {
        analytics::inc_protocol_errors();
        warn!("{} protocol error: {reason}", self.connection);
        CloseReason::ProtocolError
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
