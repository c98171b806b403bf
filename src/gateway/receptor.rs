//! gateway/receptor.rs
//!
//! Outbound job path (`dispatch`) and inbound event path
//! (`handle_inbound_event`).

use serde_json::json;
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

use crate::analytics;
use crate::config::{GatewaySettings, QueueSettings};
use crate::errors::GatewayError;
use crate::queue::{QueuePublisher, QueueRecord, payload_to_json, publish_detached};
use crate::shared_types::{ConnectionKey, CorrelationIdGenerator, Job, JobResponse};
use crate::wire_protocol::{EventFrame, JobRequestFrame, WireSerializable};

use super::{
    reactor::{ResponseReactor, Waiter},
    registry::ConnectionRegistry,
};

// -----------------------------------------------------------------------------
// ----- ReceptorService -------------------------------------------------------

#[derive(Debug)]
pub struct ReceptorService {
    registry: Arc<ConnectionRegistry>,
    reactor: Arc<ResponseReactor>,
    publisher: Arc<dyn QueuePublisher>,
    ids: CorrelationIdGenerator,
    queue: QueueSettings,
    default_timeout: Duration,
    max_frame_size: usize,
}

// -----------------------------------------------------------------------------
// ----- ReceptorService: Static -----------------------------------------------

impl ReceptorService {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        reactor: Arc<ResponseReactor>,
        publisher: Arc<dyn QueuePublisher>,
        queue: QueueSettings,
        default_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            reactor,
            publisher,
            ids: CorrelationIdGenerator::new(),
            queue,
            default_timeout,
            max_frame_size: GatewaySettings::default().max_frame_size,
        }
    }

    /// Largest job frame `dispatch` will put on the wire.
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn with_id_generator(mut self, ids: CorrelationIdGenerator) -> Self {
        self.ids = ids;
        self
    }
}

// -----------------------------------------------------------------------------
// ----- ReceptorService: Public -----------------------------------------------

impl ReceptorService {
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Send `job` to the session for `target` and hand back a waiter for its
    /// response. Fails without leaving a pending entry behind when the
    /// target is offline, the job cannot be framed, or its buffer refuses
    /// the frame.
    pub fn dispatch(
        &self,
        target: &ConnectionKey,
        job: Job,
        timeout: Option<Duration>,
    ) -> Result<Waiter, GatewayError> {
        let Some(connection) = self.registry.lookup(target) else {
            debug!("dispatch to {target} refused: not connected");
            return Err(GatewayError::TargetNotConnected {
                key: target.clone(),
            });
        };

        let correlation_id = self.ids.next_id();
        let timeout = timeout.unwrap_or(self.default_timeout);

        let request = JobRequestFrame::new(correlation_id, job);
        if let Err(e) = request.check(self.max_frame_size) {
            warn!("dispatch to {target} refused: {e}");
            return Err(GatewayError::InvalidJob {
                reason: e.to_string(),
            });
        }

        let waiter = self.reactor.register(
            correlation_id,
            target.clone(),
            connection.id(),
            timeout,
        )?;

        let directive = request.directive.clone();
        let frame = request.to_bytes();

        if let Err(e) = connection.send(frame) {
            self.reactor.cancel(correlation_id, e.clone());
            warn!("dispatch {correlation_id} to {connection} failed: {e}");
            return Err(e);
        }

        analytics::inc_jobs_dispatched();
        debug!("dispatched {correlation_id} ({directive}) to {connection}");

        if let Some(topic) = &self.queue.dispatched_topic {
            let record = json!({
                "correlation_id": correlation_id.to_string(),
                "account": target.account,
                "node_id": target.node_id,
                "directive": directive,
            });
            publish_detached(
                &self.publisher,
                QueueRecord::new(topic.clone(), target.to_string(), record.to_string()),
            );
        }

        Ok(waiter)
    }

    pub async fn dispatch_and_wait(
        &self,
        target: &ConnectionKey,
        job: Job,
        timeout: Option<Duration>,
    ) -> Result<JobResponse, GatewayError> {
        self.dispatch(target, job, timeout)?.await
    }

    /// Work the agent originated on its own. Published to the events topic;
    /// never blocks the session's reader.
    pub fn handle_inbound_event(&self, source: &ConnectionKey, event: EventFrame) {
        let envelope = json!({
            "account": source.account,
            "node_id": source.node_id,
            "directive": event.directive,
            "payload": payload_to_json(&event.payload),
        });

        analytics::inc_events_published();
        debug!("event {} from {source}", event.directive);

        publish_detached(
            &self.publisher,
            QueueRecord::new(
                self.queue.events_topic.clone(),
                source.to_string(),
                envelope.to_string(),
            ),
        );
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
