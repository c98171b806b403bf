use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    pub connections_opened: u64,
    pub connections_evicted: u64,
    pub connections_closed: u64,
    pub jobs_dispatched: u64,
    pub responses_matched: u64,
    pub responses_discarded: u64,
    pub requests_timed_out: u64,
    pub requests_connection_lost: u64,
    pub backpressure_rejections: u64,
    pub protocol_errors: u64,
    pub events_published: u64,
    pub publish_failures: u64,
}

static CONNECTIONS_OPENED: AtomicU64 = AtomicU64::new(0);
static CONNECTIONS_EVICTED: AtomicU64 = AtomicU64::new(0);
static CONNECTIONS_CLOSED: AtomicU64 = AtomicU64::new(0);
static JOBS_DISPATCHED: AtomicU64 = AtomicU64::new(0);
static RESPONSES_MATCHED: AtomicU64 = AtomicU64::new(0);
static RESPONSES_DISCARDED: AtomicU64 = AtomicU64::new(0);
static REQUESTS_TIMED_OUT: AtomicU64 = AtomicU64::new(0);
static REQUESTS_CONNECTION_LOST: AtomicU64 = AtomicU64::new(0);
static BACKPRESSURE_REJECTIONS: AtomicU64 = AtomicU64::new(0);
static PROTOCOL_ERRORS: AtomicU64 = AtomicU64::new(0);
static EVENTS_PUBLISHED: AtomicU64 = AtomicU64::new(0);
static PUBLISH_FAILURES: AtomicU64 = AtomicU64::new(0);

pub fn inc_connections_opened() {
    CONNECTIONS_OPENED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_connections_evicted() {
    CONNECTIONS_EVICTED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_connections_closed() {
    CONNECTIONS_CLOSED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_jobs_dispatched() {
    JOBS_DISPATCHED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_responses_matched() {
    RESPONSES_MATCHED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_responses_discarded() {
    RESPONSES_DISCARDED.fetch_add(1, Ordering::Relaxed);
}

pub fn add_requests_timed_out(n: u64) {
    REQUESTS_TIMED_OUT.fetch_add(n, Ordering::Relaxed);
}

pub fn add_requests_connection_lost(n: u64) {
    REQUESTS_CONNECTION_LOST.fetch_add(n, Ordering::Relaxed);
}

pub fn inc_backpressure_rejections() {
    BACKPRESSURE_REJECTIONS.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_protocol_errors() {
    PROTOCOL_ERRORS.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_events_published() {
    EVENTS_PUBLISHED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_publish_failures() {
    PUBLISH_FAILURES.fetch_add(1, Ordering::Relaxed);
}

pub fn snapshot() -> GatewayStats {
    GatewayStats {
        connections_opened: CONNECTIONS_OPENED.load(Ordering::Relaxed),
        connections_evicted: CONNECTIONS_EVICTED.load(Ordering::Relaxed),
        connections_closed: CONNECTIONS_CLOSED.load(Ordering::Relaxed),
        jobs_dispatched: JOBS_DISPATCHED.load(Ordering::Relaxed),
        responses_matched: RESPONSES_MATCHED.load(Ordering::Relaxed),
        responses_discarded: RESPONSES_DISCARDED.load(Ordering::Relaxed),
        requests_timed_out: REQUESTS_TIMED_OUT.load(Ordering::Relaxed),
        requests_connection_lost: REQUESTS_CONNECTION_LOST.load(Ordering::Relaxed),
        backpressure_rejections: BACKPRESSURE_REJECTIONS.load(Ordering::Relaxed),
        protocol_errors: PROTOCOL_ERRORS.load(Ordering::Relaxed),
        events_published: EVENTS_PUBLISHED.load(Ordering::Relaxed),
        publish_failures: PUBLISH_FAILURES.load(Ordering::Relaxed),
    }
}
