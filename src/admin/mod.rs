//! Management surface over the registry: status, listing, forced
//! disconnect, counters and ad-hoc job submission.

pub mod listener;

pub use listener::serve_management;

use serde::Serialize;
use serde_json::Value;
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::info;

use crate::analytics::{self, GatewayStats};
use crate::errors::GatewayError;
use crate::gateway::{ConnectionSnapshot, Gateway};
use crate::queue::{QueueError, QueuePublisher, json_to_payload, payload_to_json};
use crate::shared_types::{ConnectionKey, Job, ResponseStatus};

// -----------------------------------------------------------------------------
// ----- Replies ---------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReply {
    pub status: Presence,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionListing {
    /// account -> node ids, both sorted.
    pub connections: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobReply {
    pub status: ResponseStatus,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReply {
    pub topic: String,
    pub key: String,
}

// -----------------------------------------------------------------------------
// ----- AdminError ------------------------------------------------------------

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("{key} is not connected")]
    NotConnected { key: ConnectionKey },

    #[error(transparent)]
    Dispatch(#[from] GatewayError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl AdminError {
    pub fn kind(&self) -> &'static str {
        match self {
            AdminError::BadRequest(_) => "bad_request",
            AdminError::NotConnected { .. } => "not_connected",
            AdminError::Dispatch(e) => e.kind().as_str(),
            AdminError::Queue(_) => "queue_unavailable",
        }
    }
}

// -----------------------------------------------------------------------------
// ----- ManagementService -----------------------------------------------------

#[derive(Debug, Clone)]
pub struct ManagementService {
    gateway: Arc<Gateway>,
}

// -----------------------------------------------------------------------------
// ----- ManagementService: Static ---------------------------------------------

impl ManagementService {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }
}

// -----------------------------------------------------------------------------
// ----- ManagementService: Public ---------------------------------------------

impl ManagementService {
    pub fn connection_status(&self, account: &str, node_id: &str) -> Result<StatusReply, AdminError> {
        let key = require_key(account, node_id)?;

        let status = if self.gateway.registry().contains(&key) {
            Presence::Connected
        } else {
            Presence::Disconnected
        };

        Ok(StatusReply { status })
    }

    /// Ask the session for `(account, node_id)` to drain and close.
    pub fn disconnect(&self, account: &str, node_id: &str) -> Result<ConnectionSnapshot, AdminError> {
        let key = require_key(account, node_id)?;

        let Some(connection) = self.gateway.registry().lookup(&key) else {
            return Err(AdminError::NotConnected { key });
        };

        info!("management disconnect for {connection}");
        connection.drain();

        Ok(connection.snapshot())
    }

    pub fn list_connections(&self) -> ConnectionListing {
        let mut connections: BTreeMap<String, Vec<String>> = BTreeMap::new();

        // list() is sorted, so node ids arrive in order
        for key in self.gateway.registry().list() {
            connections.entry(key.account).or_default().push(key.node_id);
        }

        ConnectionListing { connections }
    }

    pub fn stats(&self) -> GatewayStats {
        analytics::snapshot()
    }

    pub async fn submit_job(
        &self,
        account: &str,
        node_id: &str,
        directive: &str,
        payload: &Value,
        timeout: Option<Duration>,
    ) -> Result<JobReply, AdminError> {
        let key = require_key(account, node_id)?;
        if directive.trim().is_empty() {
            return Err(AdminError::BadRequest("directive is required".to_string()));
        }

        let job = Job::new(directive, json_to_payload(payload));
        let response = self
            .gateway
            .receptor()
            .dispatch_and_wait(&key, job, timeout)
            .await?;

        Ok(JobReply {
            status: response.status,
            payload: payload_to_json(&response.payload),
        })
    }

    /// Put a record on the gateway's bus, as an external producer would.
    pub async fn publish(&self, topic: &str, key: &str, record: &Value) -> Result<PublishReply, AdminError> {
        if topic.trim().is_empty() {
            return Err(AdminError::BadRequest("topic is required".to_string()));
        }

        self.gateway
            .publisher()
            .publish(topic, key, json_to_payload(record))
            .await?;

        Ok(PublishReply {
            topic: topic.to_string(),
            key: key.to_string(),
        })
    }
}

pub fn format_stats(stats: &GatewayStats) -> String {
    format!(
        "connections_opened={}\nconnections_evicted={}\nconnections_closed={}\n\
         jobs_dispatched={}\nresponses_matched={}\nresponses_discarded={}\n\
         requests_timed_out={}\nrequests_connection_lost={}\nbackpressure_rejections={}\n\
         protocol_errors={}\nevents_published={}\npublish_failures={}",
        stats.connections_opened,
        stats.connections_evicted,
        stats.connections_closed,
        stats.jobs_dispatched,
        stats.responses_matched,
        stats.responses_discarded,
        stats.requests_timed_out,
        stats.requests_connection_lost,
        stats.backpressure_rejections,
        stats.protocol_errors,
        stats.events_published,
        stats.publish_failures,
    )
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

fn require_key(account: &str, node_id: &str) -> Result<ConnectionKey, AdminError> {
    let key = ConnectionKey::new(account, node_id);
    if !key.is_complete() {
        return Err(AdminError::BadRequest(
            "account and node_id are required".to_string(),
        ));
    }

    Ok(key)
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::gateway::SessionInfo;
    use crate::queue::LoggingPublisher;
    use crate::shared_types::ConnectionStatus;
    use tokio::io::DuplexStream;

    fn service() -> (ManagementService, Arc<Gateway>) {
        let gateway = Gateway::new(&Settings::default(), Arc::new(LoggingPublisher));
        (ManagementService::new(gateway.clone()), gateway)
    }

    fn connect(gateway: &Gateway, account: &str, node_id: &str) -> DuplexStream {
        let (ours, theirs) = tokio::io::duplex(4096);
        let connection = gateway.open_connection(
            SessionInfo {
                key: ConnectionKey::new(account, node_id),
                agent_version: "1.0.0".to_string(),
                peer: "test".to_string(),
            },
            ours,
        );
        connection.activate().unwrap();
        gateway.register_connection(connection).unwrap();
        theirs
    }

    #[tokio::test]
    async fn status_reports_presence() {
        let (service, gateway) = service();
        let _agent = connect(&gateway, "1234", "345");

        let connected = service.connection_status("1234", "345").unwrap();
        assert_eq!(connected.status, Presence::Connected);

        let gone = service.connection_status("1234-not-here", "345").unwrap();
        assert_eq!(gone.status, Presence::Disconnected);
    }

    #[test]
    fn blank_identifiers_are_bad_requests() {
        let (service, _gateway) = service();

        assert_eq!(service.connection_status("", "345").unwrap_err().kind(), "bad_request");
        assert_eq!(service.connection_status("1234", "").unwrap_err().kind(), "bad_request");
        assert_eq!(service.disconnect("", "").unwrap_err().kind(), "bad_request");
    }

    #[tokio::test]
    async fn listing_groups_nodes_by_account() {
        let (service, gateway) = service();
        let _a = connect(&gateway, "1234", "345");
        let _b = connect(&gateway, "1234", "346");
        let _c = connect(&gateway, "9999", "001");

        let listing = service.list_connections();
        assert_eq!(listing.connections["1234"], vec!["345", "346"]);
        assert_eq!(listing.connections["9999"], vec!["001"]);
    }

    #[tokio::test]
    async fn disconnect_drains_the_session() {
        let (service, gateway) = service();
        let _agent = connect(&gateway, "1234", "345");

        let snapshot = service.disconnect("1234", "345").unwrap();
        assert_eq!(snapshot.status, ConnectionStatus::Draining);

        let err = service.disconnect("1234", "999").unwrap_err();
        assert!(matches!(err, AdminError::NotConnected { .. }));
    }

    #[tokio::test]
    async fn job_for_offline_node_reports_kind() {
        let (service, _gateway) = service();

        let err = service
            .submit_job("1234", "999", "ping", &Value::Null, None)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "target_not_connected");
    }

    #[tokio::test]
    async fn publish_reaches_the_bus() {
        let bus = Arc::new(crate::queue::LocalBus::new());
        let mut jobs = bus.subscribe("jobs", 4);
        let service = ManagementService::new(Gateway::new(&Settings::default(), bus));

        let reply = service
            .publish("jobs", "job-9", &serde_json::json!({"directive": "ping"}))
            .await
            .unwrap();
        assert_eq!(reply.key, "job-9");

        let record = jobs.recv().await.unwrap();
        assert_eq!(record.key, "job-9");
        assert_eq!(&record.payload[..], br#"{"directive":"ping"}"#);

        let err = service.publish(" ", "k", &Value::Null).await.unwrap_err();
        assert_eq!(err.kind(), "bad_request");
    }

    #[test]
    fn stats_format_one_counter_per_line() {
        let text = format_stats(&GatewayStats::default());
        assert_eq!(text.lines().count(), 12);
        assert!(text.starts_with("connections_opened=0\n"));
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
