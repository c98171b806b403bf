//! net/outbound.rs
//!
//! Bounded queue of encoded frames waiting for the socket. Pushing never
//! waits: a full queue is reported back so the caller can surface
//! backpressure instead of stalling the dispatch path.

use bytes::{Bytes, BytesMut};
use std::time::Duration;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    select,
    sync::{mpsc, watch},
    task::JoinHandle,
    time::timeout,
};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

/// Upper bound on bytes coalesced into one write.
const COALESCE_LIMIT: usize = 64 * 1024;

// -----------------------------------------------------------------------------
// ----- Channel ---------------------------------------------------------------

pub fn outbound_channel(capacity: usize) -> (OutboundSender, OutboundReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (OutboundSender { tx }, OutboundReceiver { rx })
}

#[derive(Debug, Clone)]
pub struct OutboundSender {
    tx: mpsc::Sender<Bytes>,
}

#[derive(Debug)]
pub struct OutboundReceiver {
    rx: mpsc::Receiver<Bytes>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum PushError {
    /// Buffer at capacity; the frame is handed back.
    Full(Bytes),
    /// Writer is gone; the frame is handed back.
    Closed(Bytes),
}

// -----------------------------------------------------------------------------
// ----- OutboundSender: Public ------------------------------------------------

impl OutboundSender {
    #[inline]
    pub fn try_push(&self, frame: Bytes) -> Result<(), PushError> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(frame) => PushError::Full(frame),
            mpsc::error::TrySendError::Closed(frame) => PushError::Closed(frame),
        })
    }

    /// Frames currently queued.
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

// -----------------------------------------------------------------------------
// ----- Writer Task -----------------------------------------------------------

#[derive(Debug)]
pub enum WriterExit {
    /// Every sender dropped and the queue was flushed.
    Drained,
    /// Shutdown was signalled; unsent frames were discarded.
    Shutdown,
    /// A write exceeded the write deadline.
    TimedOut,
    Failed(std::io::Error),
}

/// Own the write half until the queue drains, a shutdown is signalled, or
/// the transport fails. The write half is shut down on every exit path.
pub fn spawn_writer_task<W>(
    mut writer: W,
    mut outbound: OutboundReceiver,
    mut shutdown: watch::Receiver<bool>,
    write_wait: Duration,
) -> JoinHandle<WriterExit>
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut batch = BytesMut::new();

        let exit = loop {
            let next = select! {
                biased;
                _ = shutdown.wait_for(|closed| *closed) => break WriterExit::Shutdown,
                next = outbound.rx.recv() => next,
            };

            let Some(first) = next else {
                break WriterExit::Drained;
            };

            // coalesce bursts to cut syscalls
            batch.extend_from_slice(&first);
            while batch.len() < COALESCE_LIMIT {
                let Ok(more) = outbound.rx.try_recv() else {
                    break;
                };
                batch.extend_from_slice(&more);
            }

            let write = async {
                writer.write_all_buf(&mut batch).await?;
                writer.flush().await
            };

            let outcome = select! {
                biased;
                _ = shutdown.wait_for(|closed| *closed) => break WriterExit::Shutdown,
                outcome = timeout(write_wait, write) => outcome,
            };

            match outcome {
                Ok(Ok(())) => batch.clear(),
                Ok(Err(e)) => break WriterExit::Failed(e),
                Err(_) => break WriterExit::TimedOut,
            }
        };

        let _ = writer.shutdown().await;
        exit
    })
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
