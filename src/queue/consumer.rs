//! Jobs arriving over the bus instead of the management surface. Each
//! record is one ordinary concurrent dispatch; its outcome is published to
//! the responses topic.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::{
    select,
    sync::{mpsc, watch},
};
use tracing::{debug, info, warn};

use crate::errors::{ErrorKind, GatewayError};
use crate::gateway::ReceptorService;
use crate::shared_types::{ConnectionKey, Job, ResponseStatus};

use super::{
    QueueError, QueuePublisher, QueueRecord, json_to_payload, payload_to_json, publish_detached,
};

// -----------------------------------------------------------------------------
// ----- Messages --------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JobMessage {
    pub account: String,
    pub node_id: String,
    pub directive: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Ok,
    Failed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutcomeError {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobOutcome {
    pub job_id: String,
    pub account: String,
    pub node_id: String,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OutcomeError>,
}

impl JobOutcome {
    fn failure(job_id: String, key: &ConnectionKey, err: &GatewayError) -> Self {
        Self {
            job_id,
            account: key.account.clone(),
            node_id: key.node_id.clone(),
            status: OutcomeStatus::Error,
            payload: None,
            error: Some(OutcomeError {
                kind: err.kind(),
                message: err.to_string(),
            }),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- JobConsumer -----------------------------------------------------------

#[derive(Debug, Clone)]
pub struct JobConsumer {
    receptor: Arc<ReceptorService>,
    publisher: Arc<dyn QueuePublisher>,
    responses_topic: String,
}

// -----------------------------------------------------------------------------
// ----- JobConsumer: Static ---------------------------------------------------

impl JobConsumer {
    pub fn new(
        receptor: Arc<ReceptorService>,
        publisher: Arc<dyn QueuePublisher>,
        responses_topic: impl Into<String>,
    ) -> Self {
        Self {
            receptor,
            publisher,
            responses_topic: responses_topic.into(),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- JobConsumer: Public ---------------------------------------------------

impl JobConsumer {
    /// Pull records until the source closes or `shutdown` flips. Returns the
    /// number of records handed to dispatch.
    pub async fn run(
        self,
        mut records: mpsc::Receiver<QueueRecord>,
        mut shutdown: watch::Receiver<bool>,
    ) -> usize {
        let mut accepted = 0;

        loop {
            let record = select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                record = records.recv() => record,
            };

            let Some(record) = record else {
                break;
            };

            accepted += 1;
            let consumer = self.clone();
            tokio::spawn(async move {
                consumer.process(record).await;
            });
        }

        info!("job consumer stopped after {accepted} record(s)");
        accepted
    }

    /// Dispatch one record, wait for the agent, publish the outcome.
    /// Malformed records are logged and skipped.
    pub async fn process(&self, record: QueueRecord) -> Option<JobOutcome> {
        let message: JobMessage = match serde_json::from_slice(&record.payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("skipping malformed job record (key {}): {e}", record.key);
                return None;
            }
        };

        let key = ConnectionKey::new(message.account, message.node_id);
        let timeout = message.timeout_ms.map(Duration::from_millis);
        let job = Job::new(message.directive, json_to_payload(&message.payload));

        let outcome = match self.receptor.dispatch(&key, job, timeout) {
            Err(e) => JobOutcome::failure(job_id(&record, None), &key, &e),

            Ok(waiter) => {
                let id = job_id(&record, Some(waiter.correlation_id().to_string()));

                match waiter.await {
                    Ok(response) => JobOutcome {
                        job_id: id,
                        account: key.account.clone(),
                        node_id: key.node_id.clone(),
                        status: match response.status {
                            ResponseStatus::Ok => OutcomeStatus::Ok,
                            ResponseStatus::Failed => OutcomeStatus::Failed,
                        },
                        payload: Some(payload_to_json(&response.payload)),
                        error: None,
                    },
                    Err(e) => JobOutcome::failure(id, &key, &e),
                }
            }
        };

        debug!("job {} for {key} finished: {:?}", outcome.job_id, outcome.status);
        self.publish(&key, &outcome);

        Some(outcome)
    }
}

// -----------------------------------------------------------------------------
// ----- JobConsumer: Private --------------------------------------------------

impl JobConsumer {
    fn publish(&self, key: &ConnectionKey, outcome: &JobOutcome) {
        let record = match self.encode(key, outcome) {
            Ok(record) => record,
            Err(e) => {
                warn!("outcome for job {} dropped: {e}", outcome.job_id);
                return;
            }
        };

        publish_detached(&self.publisher, record);
    }

    fn encode(&self, key: &ConnectionKey, outcome: &JobOutcome) -> Result<QueueRecord, QueueError> {
        let body = serde_json::to_vec(outcome).map_err(|source| QueueError::Encode {
            topic: self.responses_topic.clone(),
            source,
        })?;

        Ok(QueueRecord::new(self.responses_topic.clone(), key.to_string(), body))
    }
}

/// The record key names the job when the producer set one; otherwise the
/// correlation id does.
fn job_id(record: &QueueRecord, correlation_id: Option<String>) -> String {
    if !record.key.is_empty() {
        return record.key.clone();
    }

    correlation_id.unwrap_or_default()
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
