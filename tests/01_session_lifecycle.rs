mod support;

use std::time::Duration;

use receptor_gateway::{
    ConnectionKey, GatewayError, Job,
    config::Settings,
    wire_protocol::{EventFrame, WireSerializable},
};
use support::{FakeAgent, start_gateway, start_gateway_with};

#[tokio::test]
async fn test_reconnect_evicts_previous_session() {
    let gw = start_gateway(Settings::default()).await;
    let key = ConnectionKey::new("1234", "345");

    let mut old = FakeAgent::connect(gw.addr, "1234", "345").await;
    let waiter = gw
        .gateway
        .receptor()
        .dispatch(&key, Job::new("slow", ""), None)
        .unwrap();
    let _ = old.next_job().await;

    let mut new = FakeAgent::connect(gw.addr, "1234", "345").await;

    let err = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(err, GatewayError::ConnectionLost { key: key.clone() });

    old.wait_closed().await;
    assert_eq!(gw.gateway.registry().len(), 1);

    // new work goes to the replacement
    let waiter = gw
        .gateway
        .receptor()
        .dispatch(&key, Job::new("echo", "hi"), None)
        .unwrap();
    let job = new.next_job().await;
    new.respond(&job, "from new").await;
    assert_eq!(&waiter.await.unwrap().payload[..], b"from new");
}

#[tokio::test]
async fn test_protocol_error_only_affects_the_offending_session() {
    let gw = start_gateway(Settings::default()).await;
    let bad_key = ConnectionKey::new("1234", "bad");
    let good_key = ConnectionKey::new("1234", "good");

    let mut bad = FakeAgent::connect(gw.addr, "1234", "bad").await;
    let mut good = FakeAgent::connect(gw.addr, "1234", "good").await;

    let bad_waiter = gw
        .gateway
        .receptor()
        .dispatch(&bad_key, Job::new("x", ""), None)
        .unwrap();
    let good_waiter = gw
        .gateway
        .receptor()
        .dispatch(&good_key, Job::new("y", ""), None)
        .unwrap();

    let _ = bad.next_job().await;
    bad.send(&[b'?', 0, 0, 0, 4]).await;

    let err = tokio::time::timeout(Duration::from_secs(5), bad_waiter)
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(err, GatewayError::ConnectionLost { key: bad_key.clone() });
    bad.wait_closed().await;

    let job = good.next_job().await;
    good.respond(&job, "fine").await;
    assert_eq!(&good_waiter.await.unwrap().payload[..], b"fine");
    assert!(gw.gateway.registry().contains(&good_key));
    assert!(!gw.gateway.registry().contains(&bad_key));
}

#[tokio::test]
async fn test_unanswered_job_times_out() {
    let mut settings = Settings::default();
    settings.gateway.default_job_timeout = Duration::from_millis(200);
    settings.gateway.sweep_interval = Duration::from_millis(20);

    let gw = start_gateway(settings).await;
    let mut agent = FakeAgent::connect(gw.addr, "1234", "345").await;
    let key = ConnectionKey::new("1234", "345");

    let waiter = gw
        .gateway
        .receptor()
        .dispatch(&key, Job::new("ignored", ""), None)
        .unwrap();
    let id = waiter.correlation_id();
    let job = agent.next_job().await;

    let err = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(err, GatewayError::TimedOut { correlation_id: id });

    // a response after the deadline is dropped and the session stays up
    agent.respond(&job, "too late").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(gw.gateway.registry().contains(&key));
}

#[tokio::test]
async fn test_management_disconnect_drains_then_closes() {
    let gw = start_gateway(Settings::default()).await;
    let mut agent = FakeAgent::connect(gw.addr, "1234", "345").await;
    let key = ConnectionKey::new("1234", "345");

    let connection = gw.gateway.registry().lookup(&key).unwrap();
    assert!(connection.drain());

    assert!(agent.wait_closed().await, "agent is told before the socket closes");

    tokio::time::timeout(Duration::from_secs(5), connection.closed())
        .await
        .unwrap();
    assert!(!gw.gateway.registry().contains(&key));

    let err = gw
        .gateway
        .receptor()
        .dispatch(&key, Job::new("x", ""), None)
        .unwrap_err();
    assert_eq!(err, GatewayError::TargetNotConnected { key });
}

#[tokio::test]
async fn test_agent_events_reach_the_bus() {
    let (publisher, mut published) = receptor_gateway::queue::ChannelPublisher::bounded(8);
    let mut settings = Settings::default();
    settings.queue.events_topic = "events".to_string();

    let gw = start_gateway_with(settings, std::sync::Arc::new(publisher)).await;
    let mut agent = FakeAgent::connect(gw.addr, "1234", "345").await;

    agent
        .send(&EventFrame::new("heartbeat", r#"{"load":3}"#).to_bytes())
        .await;

    let record = tokio::time::timeout(Duration::from_secs(5), published.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.topic, "events");
    assert_eq!(record.key, "1234:345");

    let body: serde_json::Value = serde_json::from_slice(&record.payload).unwrap();
    assert_eq!(body["directive"], "heartbeat");
    assert_eq!(body["payload"]["load"], 3);
}

#[tokio::test]
async fn test_teardown_fails_everything_pending() {
    let gw = start_gateway(Settings::default()).await;
    let mut agent = FakeAgent::connect(gw.addr, "1234", "345").await;
    let key = ConnectionKey::new("1234", "345");

    let waiter = gw
        .gateway
        .receptor()
        .dispatch(&key, Job::new("x", ""), None)
        .unwrap();
    let _ = agent.next_job().await;

    gw.gateway.teardown();

    let err = waiter.await.unwrap_err();
    assert!(matches!(
        err,
        GatewayError::ConnectionLost { .. } | GatewayError::ShuttingDown
    ));
    assert!(gw.gateway.registry().is_empty());
    agent.wait_closed().await;
}
