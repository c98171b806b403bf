use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::{collections::HashMap, fmt, sync::Arc};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{info, warn};

use crate::analytics;

// -----------------------------------------------------------------------------
// ----- QueueRecord -----------------------------------------------------------

/// One message on the bus: where it goes, what it is keyed by, its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRecord {
    pub topic: String,
    pub key: String,
    pub payload: Bytes,
}

impl QueueRecord {
    pub fn new(topic: impl Into<String>, key: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            payload: payload.into(),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- QueueError ------------------------------------------------------------

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue is closed")]
    Closed,

    #[error("failed to encode record for {topic}: {source}")]
    Encode {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
}

// -----------------------------------------------------------------------------
// ----- QueuePublisher --------------------------------------------------------

/// Publish side of the durable bus. Delivery and retention guarantees belong
/// to the implementation; callers log failures and move on.
#[async_trait]
pub trait QueuePublisher: Send + Sync + fmt::Debug {
    async fn publish(&self, topic: &str, key: &str, payload: Bytes) -> Result<(), QueueError>;
}

/// Publish from a spawned task so the caller never waits on the bus.
pub fn publish_detached(
    publisher: &Arc<dyn QueuePublisher>,
    record: QueueRecord,
) -> JoinHandle<Result<(), QueueError>> {
    let publisher = Arc::clone(publisher);

    tokio::spawn(async move {
        let QueueRecord {
            topic,
            key,
            payload,
        } = record;

        let result = publisher.publish(&topic, &key, payload).await;
        if let Err(e) = &result {
            analytics::inc_publish_failures();
            warn!("publish to {topic} (key {key}) failed: {e}");
        }

        result
    })
}

// -----------------------------------------------------------------------------
// ----- LoggingPublisher ------------------------------------------------------

/// Stand-in bus for deployments without one: records are only logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingPublisher;

#[async_trait]
impl QueuePublisher for LoggingPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: Bytes) -> Result<(), QueueError> {
        info!(
            "publish topic={topic} key={key} bytes={} body={}",
            payload.len(),
            String::from_utf8_lossy(&payload)
        );
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// ----- ChannelPublisher ------------------------------------------------------

/// In-process bus: records come out of the paired receiver in publish order.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<QueueRecord>,
}

impl ChannelPublisher {
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<QueueRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl QueuePublisher for ChannelPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: Bytes) -> Result<(), QueueError> {
        self.tx
            .send(QueueRecord::new(topic, key, payload))
            .await
            .map_err(|_| QueueError::Closed)
    }
}

// -----------------------------------------------------------------------------
// ----- LocalBus --------------------------------------------------------------

/// Single-process bus. A subscribed topic delivers to its receiver; every
/// other topic falls through to the log.
#[derive(Debug, Default)]
pub struct LocalBus {
    subscribers: RwLock<HashMap<String, mpsc::Sender<QueueRecord>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `topic` to a fresh receiver. Replaces any earlier subscriber.
    pub fn subscribe(&self, topic: impl Into<String>, capacity: usize) -> mpsc::Receiver<QueueRecord> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.subscribers.write().insert(topic.into(), tx);
        rx
    }
}

#[async_trait]
impl QueuePublisher for LocalBus {
    async fn publish(&self, topic: &str, key: &str, payload: Bytes) -> Result<(), QueueError> {
        let subscriber = self.subscribers.read().get(topic).cloned();

        match subscriber {
            Some(tx) => tx
                .send(QueueRecord::new(topic, key, payload))
                .await
                .map_err(|_| QueueError::Closed),
            None => LoggingPublisher.publish(topic, key, payload).await,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_publisher_delivers_in_order() {
        let (publisher, mut rx) = ChannelPublisher::bounded(4);

        publisher.publish("t", "a", Bytes::from_static(b"1")).await.unwrap();
        publisher.publish("t", "b", Bytes::from_static(b"2")).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), QueueRecord::new("t", "a", "1"));
        assert_eq!(rx.recv().await.unwrap(), QueueRecord::new("t", "b", "2"));
    }

    #[tokio::test]
    async fn closed_channel_is_an_error() {
        let (publisher, rx) = ChannelPublisher::bounded(1);
        drop(rx);

        let err = publisher.publish("t", "a", Bytes::new()).await.unwrap_err();
        assert!(matches!(err, QueueError::Closed));
    }

    #[tokio::test]
    async fn detached_failure_is_reported() {
        let (publisher, rx) = ChannelPublisher::bounded(1);
        drop(rx);
        let publisher: Arc<dyn QueuePublisher> = Arc::new(publisher);

        let before = analytics::snapshot().publish_failures;
        let result = publish_detached(&publisher, QueueRecord::new("t", "k", "x"))
            .await
            .unwrap();

        assert!(result.is_err());
        assert!(analytics::snapshot().publish_failures > before);
    }

    #[tokio::test]
    async fn local_bus_routes_subscribed_topics_only() {
        let bus = LocalBus::new();
        let mut jobs = bus.subscribe("jobs", 4);

        bus.publish("events", "k", Bytes::from_static(b"ignored")).await.unwrap();
        bus.publish("jobs", "j-1", Bytes::from_static(b"{}")).await.unwrap();

        assert_eq!(jobs.recv().await.unwrap(), QueueRecord::new("jobs", "j-1", "{}"));
        assert!(jobs.try_recv().is_err());
    }

    #[tokio::test]
    async fn local_bus_reports_a_gone_subscriber() {
        let bus = LocalBus::new();
        drop(bus.subscribe("jobs", 1));

        let err = bus.publish("jobs", "k", Bytes::new()).await.unwrap_err();
        assert!(matches!(err, QueueError::Closed));
    }

    #[test]
    fn encode_error_names_the_topic() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = QueueError::Encode {
            topic: "responses".to_string(),
            source,
        };
        assert!(err.to_string().starts_with("failed to encode record for responses"));
    }

    #[tokio::test]
    async fn logging_publisher_accepts_everything() {
        LoggingPublisher
            .publish("t", "k", Bytes::from_static(b"{}"))
            .await
            .unwrap();
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
