use bytes::BytesMut;
use std::sync::Arc;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::watch,
    task::JoinHandle,
};
use tracing::info;

use crate::config::{GatewaySettings, Settings};
use crate::errors::GatewayError;
use crate::queue::QueuePublisher;

use super::{
    connection::{CloseReason, Connection, SessionInfo},
    dispatcher::MessageDispatcher,
    reactor::ResponseReactor,
    receptor::ReceptorService,
    registry::ConnectionRegistry,
};

// -----------------------------------------------------------------------------
// ----- Gateway ---------------------------------------------------------------

/// Owns the shared state of the core: registry, reactor and receptor
/// service. Built once at process start, torn down once at exit.
#[derive(Debug)]
pub struct Gateway {
    settings: GatewaySettings,
    registry: Arc<ConnectionRegistry>,
    reactor: Arc<ResponseReactor>,
    receptor: Arc<ReceptorService>,
    publisher: Arc<dyn QueuePublisher>,
    shutdown: watch::Sender<bool>,
}

// -----------------------------------------------------------------------------
// ----- Gateway: Static -------------------------------------------------------

impl Gateway {
    pub fn new(settings: &Settings, publisher: Arc<dyn QueuePublisher>) -> Arc<Gateway> {
        let registry = Arc::new(ConnectionRegistry::new());
        let reactor = Arc::new(ResponseReactor::new());
        let receptor = ReceptorService::new(
            registry.clone(),
            reactor.clone(),
            publisher.clone(),
            settings.queue.clone(),
            settings.gateway.default_job_timeout,
        )
        .with_max_frame_size(settings.gateway.max_frame_size);
        let receptor = Arc::new(receptor);
        let (shutdown, _) = watch::channel(false);

        Arc::new(Gateway {
            settings: settings.gateway.clone(),
            registry,
            reactor,
            receptor,
            publisher,
            shutdown,
        })
    }
}

// -----------------------------------------------------------------------------
// ----- Gateway: Public -------------------------------------------------------

impl Gateway {
    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn reactor(&self) -> &Arc<ResponseReactor> {
        &self.reactor
    }

    pub fn receptor(&self) -> &Arc<ReceptorService> {
        &self.receptor
    }

    pub fn publisher(&self) -> &Arc<dyn QueuePublisher> {
        &self.publisher
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Background expiry of pending requests; stops at teardown.
    pub fn start_sweeper(&self) -> JoinHandle<()> {
        self.reactor
            .spawn_sweeper(self.settings.sweep_interval, self.shutdown_signal())
    }

    /// New `Connecting` session writing to `writer`.
    pub fn open_connection<W>(&self, info: SessionInfo, writer: W) -> Arc<Connection>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Connection::open(
            info,
            writer,
            &self.settings,
            self.reactor.clone(),
            Arc::downgrade(&self.registry),
        )
    }

    /// Make an active session visible to dispatch. Refused once teardown has
    /// started.
    pub fn register_connection(
        &self,
        connection: Arc<Connection>,
    ) -> Result<Option<Arc<Connection>>, GatewayError> {
        if self.is_shutting_down() {
            connection.close(CloseReason::Shutdown);
            return Err(GatewayError::ShuttingDown);
        }

        let evicted = self.registry.register(connection.clone())?;

        // lost a race with teardown's close_all
        if self.is_shutting_down() {
            connection.close(CloseReason::Shutdown);
            return Err(GatewayError::ShuttingDown);
        }

        Ok(evicted)
    }

    pub fn dispatcher<R>(
        &self,
        connection: Arc<Connection>,
        reader: R,
        inbox: BytesMut,
    ) -> MessageDispatcher<R>
    where
        R: AsyncRead + Unpin,
    {
        MessageDispatcher::new(
            connection,
            reader,
            inbox,
            self.reactor.clone(),
            self.receptor.clone(),
            &self.settings,
        )
    }

    /// Stop accepting, close every session, fail every pending request.
    pub fn teardown(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }

        let closed = self.registry.close_all(CloseReason::Shutdown);
        let cancelled = self.reactor.cancel_everything(GatewayError::ShuttingDown);

        info!("gateway torn down: {closed} session(s) closed, {cancelled} request(s) cancelled");
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
