//! Correlates dispatched job frames with the response frames that answer them.
//!
//! Every pending entry is resolved exactly once. `resolve`, the cancel
//! family and the expiry sweep all remove the entry from the table under the
//! same lock before touching its waiter, so whichever acts first wins and the
//! rest find nothing to do.

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{
    select,
    sync::{oneshot, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval},
};
use tracing::{debug, error, info, warn};

use crate::analytics;
use crate::errors::{ErrorKind, GatewayError};
use crate::shared_types::{ConnectionId, ConnectionKey, CorrelationId, JobResponse};

// -----------------------------------------------------------------------------
// ----- Types -----------------------------------------------------------------

pub type JobResult = Result<JobResponse, GatewayError>;

#[derive(Debug)]
struct PendingRequest {
    target_key: ConnectionKey,
    connection_id: ConnectionId,
    deadline: Instant,
    waiter: oneshot::Sender<JobResult>,
}

// -----------------------------------------------------------------------------
// ----- Waiter ----------------------------------------------------------------

/// Caller's handle on one pending request. Resolves with the agent's
/// response, `TimedOut`, or `ConnectionLost`.
#[derive(Debug)]
pub struct Waiter {
    correlation_id: CorrelationId,
    rx: oneshot::Receiver<JobResult>,
}

impl Waiter {
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }
}

impl Future for Waiter {
    type Output = JobResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // the entry was dropped without fulfilment: only happens when the
            // reactor itself goes away
            Poll::Ready(Err(_)) => Poll::Ready(Err(GatewayError::ShuttingDown)),
            Poll::Pending => Poll::Pending,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- ResponseReactor -------------------------------------------------------

#[derive(Debug, Default)]
pub struct ResponseReactor {
    pending: Mutex<HashMap<CorrelationId, PendingRequest>>,
}

// -----------------------------------------------------------------------------
// ----- ResponseReactor: Static -----------------------------------------------

impl ResponseReactor {
    pub fn new() -> Self {
        Self::default()
    }
}

// -----------------------------------------------------------------------------
// ----- ResponseReactor: Public -----------------------------------------------

impl ResponseReactor {
    pub fn register(
        &self,
        correlation_id: CorrelationId,
        target_key: ConnectionKey,
        connection_id: ConnectionId,
        timeout: Duration,
    ) -> Result<Waiter, GatewayError> {
        let (tx, rx) = oneshot::channel();
        let deadline = Instant::now() + timeout;

        let mut pending = self.pending.lock();
        if pending.contains_key(&correlation_id) {
            error!("correlation id {correlation_id} already pending; refusing to overwrite");
            return Err(GatewayError::DuplicateCorrelationId { correlation_id });
        }

        pending.insert(
            correlation_id,
            PendingRequest {
                target_key,
                connection_id,
                deadline,
                waiter: tx,
            },
        );

        Ok(Waiter { correlation_id, rx })
    }

    /// Fulfil the waiter for `response.correlation_id`. Unknown, late and
    /// duplicate responses are logged and dropped; returns whether a waiter
    /// was fulfilled.
    pub fn resolve(&self, response: JobResponse) -> bool {
        let correlation_id = response.correlation_id;
        let entry = self.pending.lock().remove(&correlation_id);

        let Some(entry) = entry else {
            analytics::inc_responses_discarded();
            debug!("discarding response {correlation_id}: no pending request (late or duplicate)");
            return false;
        };

        analytics::inc_responses_matched();
        if entry.waiter.send(Ok(response)).is_err() {
            debug!(
                "response {correlation_id} for {} arrived after its caller went away",
                entry.target_key
            );
        }

        true
    }

    /// Fail a single pending request. Returns whether it was still pending.
    pub fn cancel(&self, correlation_id: CorrelationId, reason: GatewayError) -> bool {
        let entry = self.pending.lock().remove(&correlation_id);

        match entry {
            Some(entry) => {
                fail_all(vec![entry], &reason);
                true
            }
            None => false,
        }
    }

    /// Fail every pending request addressed to `target_key`, whichever
    /// session instance it was written to.
    pub fn cancel_all_for(&self, target_key: &ConnectionKey, reason: GatewayError) -> usize {
        self.remove_where(|entry| entry.target_key == *target_key, &reason)
    }

    /// Fail the pending requests written to one specific session instance.
    /// Requests already handed to a newer session for the same key survive.
    pub fn cancel_connection(
        &self,
        target_key: &ConnectionKey,
        connection_id: ConnectionId,
        reason: GatewayError,
    ) -> usize {
        self.remove_where(
            |entry| entry.connection_id == connection_id && entry.target_key == *target_key,
            &reason,
        )
    }

    pub fn cancel_everything(&self, reason: GatewayError) -> usize {
        self.remove_where(|_| true, &reason)
    }

    /// Fail every entry whose deadline is at or before `now` with `TimedOut`.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let expired: Vec<(CorrelationId, PendingRequest)> = {
            let mut pending = self.pending.lock();
            let ids: Vec<CorrelationId> = pending
                .iter()
                .filter(|(_, entry)| entry.deadline <= now)
                .map(|(id, _)| *id)
                .collect();

            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|entry| (id, entry)))
                .collect()
        };

        let count = expired.len();
        if count == 0 {
            return 0;
        }

        analytics::add_requests_timed_out(count as u64);
        for (correlation_id, entry) in expired {
            warn!(
                "request {correlation_id} to {} timed out",
                entry.target_key
            );
            let _ = entry
                .waiter
                .send(Err(GatewayError::TimedOut { correlation_id }));
        }

        count
    }

    /// Run `sweep_expired` every `every` until `shutdown` flips to true.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let reactor = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                select! {
                    biased;
                    _ = shutdown.wait_for(|stop| *stop) => break,
                    now = ticker.tick() => {
                        reactor.sweep_expired(now);
                    }
                }
            }

            info!("reactor sweep stopped");
        })
    }

    pub fn is_pending(&self, correlation_id: CorrelationId) -> bool {
        self.pending.lock().contains_key(&correlation_id)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

// -----------------------------------------------------------------------------
// ----- ResponseReactor: Private ----------------------------------------------

impl ResponseReactor {
    fn remove_where(
        &self,
        mut predicate: impl FnMut(&PendingRequest) -> bool,
        reason: &GatewayError,
    ) -> usize {
        let removed: Vec<PendingRequest> = {
            let mut pending = self.pending.lock();
            let ids: Vec<CorrelationId> = pending
                .iter()
                .filter(|(_, entry)| predicate(entry))
                .map(|(id, _)| *id)
                .collect();

            ids.iter().filter_map(|id| pending.remove(id)).collect()
        };

        let count = removed.len();
        fail_all(removed, reason);
        count
    }
}

fn fail_all(entries: Vec<PendingRequest>, reason: &GatewayError) {
    if entries.is_empty() {
        return;
    }

    if reason.kind() == ErrorKind::ConnectionLost {
        analytics::add_requests_connection_lost(entries.len() as u64);
    }

    for entry in entries {
        let _ = entry.waiter.send(Err(reason.clone()));
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
