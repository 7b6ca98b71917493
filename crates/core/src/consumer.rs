//! Buffered-mode frame retrieval.
//!
//! The consumer reads whichever frame occupies the ring slot at its cursor.
//! It never waits for a specific sequence number and never hands out a
//! frame whose sequence number is not strictly newer than the last one it
//! delivered.
//!
//! ```text
//! cursor slot complete & newer ──────────────────────────> deliver
//!            │
//!            └─ wait on slot (up to timeout) ─ complete ──> deliver
//!                                  │
//!                                  └─ timed out ─ HEADER + >= min packets ─> deliver partial
//!                                                  │
//!                                                  └─ Timeout { packets }
//! ```
//!
//! Delivery copies the frame out under the slot lock, clears the slot's
//! bookkeeping, advances the cursor by one slot and records the delivered
//! sequence number.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::DEFAULT_MIN_PARTIAL_PACKETS;
use crate::error::{Result, TransportError};
use crate::media::Frame;
use crate::protocol::FrameLayout;
use crate::ring::{FrameRing, is_newer};

/// Buffered-mode reader that hands out frames from a [`FrameRing`] in ring order.
pub struct FrameConsumer {
    ring: Arc<FrameRing>,
    cursor: usize,
    last_delivered: Option<u32>,
    min_partial_packets: u16,
}

impl FrameConsumer {
    pub fn new(ring: Arc<FrameRing>) -> Self {
        Self::with_min_partial_packets(ring, DEFAULT_MIN_PARTIAL_PACKETS)
    }

    /// `min_partial_packets` datagrams must have arrived for a timed-out
    /// frame to be delivered as partial.
    pub fn with_min_partial_packets(ring: Arc<FrameRing>, min_partial_packets: u16) -> Self {
        Self {
            ring,
            cursor: 0,
            last_delivered: None,
            min_partial_packets,
        }
    }

    /// Ring slot the next call reads.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn last_delivered(&self) -> Option<u32> {
        self.last_delivered
    }

    /// Wait up to `timeout` for the next frame.
    ///
    /// A timeout too large to add to the current instant, such as
    /// [`Duration::MAX`], waits without a deadline.
    pub fn next_frame(&mut self, timeout: Duration) -> Result<Frame> {
        let mut frame = Frame::default();
        self.next_frame_into(timeout, &mut frame)?;
        Ok(frame)
    }

    /// Like [`next_frame`](Self::next_frame), reusing `out`'s buffers.
    ///
    /// On [`TransportError::Timeout`] `out` is left untouched.
    pub fn next_frame_into(&mut self, timeout: Duration, out: &mut Frame) -> Result<()> {
        let deadline = Instant::now().checked_add(timeout);
        let last = self.last_delivered;
        let slot = self.ring.slot(self.cursor);
        let mut state = slot.lock();

        while !state.is_complete_after(last) {
            if !slot.wait_until(&mut state, deadline) {
                break;
            }
        }

        let deliverable =
            state.is_complete_after(last) || state.is_partial_after(last, self.min_partial_packets);
        let frame_seq = if deliverable { state.copy_into(out) } else { None };
        let Some(frame_seq) = frame_seq else {
            let packets = state.pending_packets(last);
            drop(state);
            tracing::trace!(cursor = self.cursor, packets, "no frame before deadline");
            self.resync();
            return Err(TransportError::Timeout { packets });
        };
        state.reset();
        drop(state);

        if !out.complete {
            tracing::debug!(
                frame_seq,
                packets = out.packets_received,
                expected = FrameLayout::for_header(&out.header).packets,
                "delivering partial frame"
            );
        }
        tracing::trace!(slot = self.cursor, frame_seq, complete = out.complete, "frame delivered");

        self.last_delivered = Some(frame_seq);
        self.cursor = (self.cursor + 1) % self.ring.len();
        Ok(())
    }

    /// Move the cursor to the oldest slot holding a complete frame newer
    /// than the last delivery, if the current slot has nothing to offer.
    ///
    /// Without this a frame whose HEADER was lost would stall delivery
    /// until the ring wraps around to that slot again.
    fn resync(&mut self) {
        let mut oldest: Option<(usize, u32)> = None;
        for step in 1..self.ring.len() {
            let index = (self.cursor + step) % self.ring.len();
            let state = self.ring.slot(index).lock();
            if !state.is_complete_after(self.last_delivered) {
                continue;
            }
            let Some(seq) = state.stats().frame_seq else {
                continue;
            };
            if oldest.is_none_or(|(_, best)| is_newer(best, Some(seq))) {
                oldest = Some((index, seq));
            }
        }

        if let Some((index, frame_seq)) = oldest {
            tracing::debug!(from = self.cursor, to = index, frame_seq, "consumer cursor resynchronized");
            self.cursor = index;
        }
    }
}
