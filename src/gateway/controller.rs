//! gateway/controller.rs
//!
//! Accept path for agents: socket, optional TLS, handshake, registration,
//! then the session's dispatcher until it closes.

use bytes::BytesMut;
use std::{fmt, net::SocketAddr, sync::Arc};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
    select,
    time::timeout,
};
use tokio_rustls::{TlsAcceptor, server::TlsStream};
use tracing::{debug, error, info, warn};

use crate::wire_protocol::ControlFrame;

use super::{
    connection::{CloseReason, SessionInfo},
    gateway::Gateway,
    handshake::{HandshakeError, read_handshake},
};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const INBOX_CAPACITY_HINT: usize = 4096;

// -----------------------------------------------------------------------------
// ----- ReceptorController ----------------------------------------------------

#[derive(Clone)]
pub struct ReceptorController {
    gateway: Arc<Gateway>,
    tls: Option<TlsAcceptor>,
}

impl fmt::Debug for ReceptorController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceptorController")
            .field("gateway", &self.gateway)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

// -----------------------------------------------------------------------------
// ----- ReceptorController: Static --------------------------------------------

impl ReceptorController {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway, tls: None }
    }

    pub fn with_tls(mut self, tls: Option<TlsAcceptor>) -> Self {
        self.tls = tls;
        self
    }
}

// -----------------------------------------------------------------------------
// ----- ReceptorController: Public --------------------------------------------

impl ReceptorController {
    /// Accept agents until the gateway starts tearing down.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        let mut shutdown = self.gateway.shutdown_signal();
        let tls = if self.tls.is_some() { "tls" } else { "plaintext" };
        info!("accepting agents on {} ({tls})", listener.local_addr()?);

        loop {
            select! {
                biased;

                _ = shutdown.wait_for(|stop| *stop) => {
                    info!("agent listener stopped");
                    break;
                }

                accept_res = listener.accept() => {
                    let (stream, peer) = match accept_res {
                        Ok(v) => v,
                        Err(e) => { error!("accept error: {e}"); continue; }
                    };

                    let _ = stream.set_nodelay(true);

                    let controller = self.clone();
                    tokio::spawn(async move {
                        controller.handle_stream(stream, peer).await;
                    });
                }
            }
        }

        Ok(())
    }

    /// Drive one accepted socket to completion.
    pub async fn handle_stream(&self, stream: TcpStream, peer: SocketAddr) {
        let outcome = match &self.tls {
            Some(acceptor) => match self.accept_tls(acceptor, stream).await {
                Ok(stream) => self.run_session(stream, peer.to_string()).await,
                Err(e) => {
                    warn!("tls handshake with {peer} failed: {e}");
                    return;
                }
            },
            None => self.run_session(stream, peer.to_string()).await,
        };

        match outcome {
            Ok(reason) => debug!("session from {peer} ended ({reason})"),
            Err(e) => warn!("agent {peer} rejected: {e}"),
        }
    }

    /// Handshake, register and serve one session over any duplex stream.
    pub async fn run_session<S>(&self, stream: S, peer: String) -> Result<CloseReason, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let settings = self.gateway.settings();
        let (mut reader, writer) = tokio::io::split(stream);
        let mut inbox = BytesMut::with_capacity(INBOX_CAPACITY_HINT);

        let hello = read_handshake(
            &mut reader,
            &mut inbox,
            settings.max_frame_size,
            settings.handshake_timeout,
        )
        .await?;

        let info = SessionInfo {
            key: hello.key(),
            agent_version: hello.agent_version,
            peer,
        };
        info!(
            "agent {} ({}) handshaken from {}",
            info.key, info.agent_version, info.peer
        );

        let connection = self.gateway.open_connection(info, writer);
        connection.activate()?;

        // queued ahead of anything dispatch can write
        connection.send(ControlFrame::handshake_ok())?;

        self.gateway.register_connection(connection.clone())?;

        let reason = self
            .gateway
            .dispatcher(connection, reader, inbox)
            .run()
            .await;

        Ok(reason)
    }
}

// -----------------------------------------------------------------------------
// ----- ReceptorController: Private -------------------------------------------

impl ReceptorController {
    /// TLS accept, bounded by `handshake_timeout`.
    async fn accept_tls<S>(&self, acceptor: &TlsAcceptor, stream: S) -> Result<TlsStream<S>, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let deadline = self.gateway.settings().handshake_timeout;

        match timeout(deadline, acceptor.accept(stream)).await {
            Ok(accepted) => Ok(accepted?),
            Err(_) => Err(HandshakeError::TimedOut(deadline)),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
