//! Background ingestion loop.
//!
//! One thread per receiver pulls datagrams off the socket and routes them
//! into the [`FrameRing`]. It blocks in `recv` for at most the configured
//! poll interval, then re-checks its `running` flag so that
//! [`IngestLoop::stop`] returns promptly even on a silent stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{Result, TransportError};
use crate::protocol::DATAGRAM_SIZE;
use crate::ring::{DropReason, FrameRing, Ingested};
use crate::transport::{Endpoint, RECV_BUFFER_LEN};

/// Counters kept by the ingestion loop, returned when it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub datagrams: u64,
    pub frames_started: u64,
    pub frames_completed: u64,
    /// Payload datagrams that repeated an already received seq.
    pub rewritten: u64,
    pub invalid: u64,
    pub unknown_slot: u64,
    pub orphan: u64,
    pub stale: u64,
    pub duplicate: u64,
    pub inconsistent_header: u64,
    pub out_of_bounds: u64,
}

impl IngestStats {
    pub fn record(&mut self, outcome: Ingested) {
        self.datagrams += 1;
        match outcome {
            Ingested::Started { .. } => self.frames_started += 1,
            Ingested::Accepted { .. } => {}
            Ingested::Rewritten { .. } => self.rewritten += 1,
            Ingested::Completed { .. } => self.frames_completed += 1,
            Ingested::Dropped(reason) => *self.counter(reason) += 1,
        }
    }

    /// Datagrams that were not written into the ring.
    pub fn dropped(&self) -> u64 {
        self.invalid
            + self.unknown_slot
            + self.orphan
            + self.stale
            + self.duplicate
            + self.inconsistent_header
            + self.out_of_bounds
    }

    fn counter(&mut self, reason: DropReason) -> &mut u64 {
        match reason {
            DropReason::Invalid => &mut self.invalid,
            DropReason::UnknownSlot => &mut self.unknown_slot,
            DropReason::Orphan => &mut self.orphan,
            DropReason::Stale => &mut self.stale,
            DropReason::Duplicate => &mut self.duplicate,
            DropReason::InconsistentHeader => &mut self.inconsistent_header,
            DropReason::OutOfBounds => &mut self.out_of_bounds,
        }
    }
}

/// Handle to a running ingestion thread.
///
/// Dropping the handle stops the thread and waits for it.
pub struct IngestLoop {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<IngestStats>>>,
}

impl IngestLoop {
    pub fn spawn(endpoint: Arc<Endpoint>, ring: Arc<FrameRing>, poll_interval: Duration) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let thread = thread::Builder::new()
            .name("framecast-ingest".into())
            .spawn(move || run(&endpoint, &ring, &flag, poll_interval))?;

        Ok(Self {
            running,
            thread: Some(thread),
        })
    }

    /// False once stopped or once the thread exited on a socket error.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the thread and collect its counters.
    ///
    /// A socket error that ended the loop early is reported as
    /// [`TransportError::IngestFailed`].
    pub fn stop(mut self) -> Result<IngestStats> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<IngestStats> {
        self.running.store(false, Ordering::SeqCst);
        let Some(thread) = self.thread.take() else {
            return Err(TransportError::NotStarted);
        };
        match thread.join() {
            Ok(Ok(stats)) => Ok(stats),
            Ok(Err(e)) => Err(TransportError::IngestFailed(e.to_string())),
            Err(_) => Err(TransportError::IngestFailed("ingestion thread panicked".into())),
        }
    }
}

impl Drop for IngestLoop {
    fn drop(&mut self) {
        if self.thread.is_some()
            && let Err(e) = self.shutdown()
        {
            tracing::warn!(error = %e, "ingestion loop ended with error");
        }
    }
}

fn run(endpoint: &Endpoint, ring: &FrameRing, running: &AtomicBool, poll_interval: Duration) -> Result<IngestStats> {
    let mut stats = IngestStats::default();
    let mut buf = [0u8; RECV_BUFFER_LEN];

    tracing::debug!(slots = ring.len(), ?poll_interval, "ingestion loop started");

    while running.load(Ordering::SeqCst) {
        let len = match endpoint.recv_datagram(&mut buf, Some(poll_interval)) {
            Ok(Some(len)) => len,
            Ok(None) => continue,
            Err(e) => {
                running.store(false, Ordering::SeqCst);
                tracing::error!(error = %e, "ingestion loop stopped on socket error");
                return Err(e);
            }
        };

        if len != DATAGRAM_SIZE {
            tracing::debug!(len, "dropping datagram of unexpected length");
            stats.record(Ingested::Dropped(DropReason::Invalid));
            continue;
        }
        stats.record(ring.ingest(&buf[..len]));
    }

    tracing::debug!(
        datagrams = stats.datagrams,
        completed = stats.frames_completed,
        dropped = stats.dropped(),
        "ingestion loop exited"
    );
    Ok(stats)
}
