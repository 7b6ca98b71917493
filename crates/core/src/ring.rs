//! Frame ring buffer.
//!
//! A fixed number of reusable slots, each holding the reassembly state of
//! one logical frame. A datagram names its slot directly (frame sequence
//! modulo ring size), so routing needs no lookup.
//!
//! ## Slot lifecycle
//!
//! ```text
//! Empty ──HEADER──> Filling ──last datagram──> Complete ──delivered──> Empty
//!                     │  ^
//!                     └──┘ AUDIO / VIDEO (placed by in-frame seq)
//! ```
//!
//! A newer HEADER for the same slot restarts it in `Filling`; the older
//! frame is lost. Two frames whose sequence numbers differ by the ring
//! size alias the same slot and the last write to an in-frame sequence
//! number wins, without counting twice toward completion. Every payload write
//! is checked against the region sizes declared by the slot's current
//! header, so a late datagram of the older frame can never land outside
//! the newer frame's regions.
//!
//! ## Locking
//!
//! Each slot has its own mutex, held only for the memory copy into or out
//! of the slot buffer, never across socket I/O. Completion is signaled on
//! a per-slot condition variable.

use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::config::validate_ring_slots;
use crate::error::{Region, Result, TransportError};
use crate::media::Frame;
use crate::protocol::{Datagram, DatagramKind, FrameHeader, FrameLayout, HEADER_SIZE};

/// Reassembly bookkeeping of one slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Sequence number from the slot's HEADER; `None` until one arrives.
    pub frame_seq: Option<u32>,
    /// Distinct datagrams accepted for this frame.
    pub packets: u16,
    pub first_arrival: Option<Instant>,
    pub completed_at: Option<Instant>,
    pub complete: bool,
}

/// What [`FrameRing::ingest`] did with a datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingested {
    /// A HEADER (re)started the slot.
    Started { slot: usize, frame_seq: u32 },
    /// A payload datagram was written.
    Accepted { slot: usize },
    /// A payload datagram repeated an in-frame seq already received. Its
    /// bytes replaced the earlier ones; the packet count is unchanged.
    Rewritten { slot: usize },
    /// The datagram was the last one missing.
    Completed { slot: usize, frame_seq: u32 },
    Dropped(DropReason),
}

/// Why a datagram was not written into the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Bad sync byte, length or flags; or a kind that contradicts its seq.
    Invalid,
    /// Slot index beyond this ring's size.
    UnknownSlot,
    /// Payload for a slot that has no HEADER yet.
    Orphan,
    /// HEADER older than the frame the slot already holds.
    Stale,
    /// HEADER of the frame the slot already holds.
    Duplicate,
    /// HEADER whose declared sizes or sequence do not add up.
    InconsistentHeader,
    /// Write would fall outside the declared audio or video region.
    OutOfBounds,
}

/// Serial-number comparison: is `seq` after `last`?
///
/// `None` (nothing delivered yet) accepts any sequence number.
pub fn is_newer(seq: u32, last: Option<u32>) -> bool {
    last.is_none_or(|last| (seq.wrapping_sub(last) as i32) > 0)
}

/// Fixed set of frame slots shared by the ingestion loop and consumers.
pub struct FrameRing {
    slots: Box<[RingSlot]>,
    slot_capacity: usize,
}

pub(crate) struct RingSlot {
    state: Mutex<SlotState>,
    completed: Condvar,
}

pub(crate) struct SlotState {
    data: Vec<u8>,
    header: Option<FrameHeader>,
    layout: FrameLayout,
    received: Vec<u64>,
    stats: FrameStats,
}

impl FrameRing {
    /// Allocate `slots` slots, each able to hold a frame with the largest
    /// audio block the header can declare and up to `max_video_size` bytes
    /// of video.
    pub fn new(slots: usize, max_video_size: usize) -> Result<Self> {
        validate_ring_slots(slots)?;

        let largest = FrameLayout::new(u16::MAX as usize, max_video_size);
        let slot_capacity = largest.frame_size();
        let bitmap_words = largest.packets.div_ceil(64);

        let slots = (0..slots)
            .map(|_| RingSlot {
                state: Mutex::new(SlotState {
                    data: vec![0u8; slot_capacity],
                    header: None,
                    layout: FrameLayout::default(),
                    received: vec![0u64; bitmap_words],
                    stats: FrameStats::default(),
                }),
                completed: Condvar::new(),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        tracing::debug!(slots = slots.len(), slot_capacity, "frame ring allocated");

        Ok(Self {
            slots,
            slot_capacity,
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Bytes of header + audio + video one slot can hold.
    pub fn slot_capacity(&self) -> usize {
        self.slot_capacity
    }

    /// Snapshot of a slot's bookkeeping.
    pub fn stats(&self, slot: usize) -> Option<FrameStats> {
        self.slots.get(slot).map(|s| s.state.lock().stats)
    }

    /// Route one received datagram into its slot.
    ///
    /// Never fails: anything that cannot be placed is logged and reported
    /// as [`Ingested::Dropped`].
    pub fn ingest(&self, datagram: &[u8]) -> Ingested {
        let now = Instant::now();
        let parsed = match Datagram::parse(datagram) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!(error = %e, "dropping invalid datagram");
                return Ingested::Dropped(DropReason::Invalid);
            }
        };

        let index = parsed.slot as usize;
        let Some(slot) = self.slots.get(index) else {
            tracing::debug!(slot = index, ring = self.slots.len(), "datagram for slot outside ring");
            return Ingested::Dropped(DropReason::UnknownSlot);
        };

        let mut state = slot.state.lock();
        let outcome = match parsed.kind {
            DatagramKind::Header => state.begin_frame(index, self.slots.len(), &parsed, now),
            _ => state.write_payload(index, &parsed, now),
        };
        drop(state);

        if let Ingested::Completed { slot: index, frame_seq } = outcome {
            tracing::trace!(slot = index, frame_seq, "frame complete");
            slot.completed.notify_all();
        }
        outcome
    }

    pub(crate) fn slot(&self, index: usize) -> &RingSlot {
        &self.slots[index]
    }
}

impl RingSlot {
    pub(crate) fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock()
    }

    /// Wait for a completion signal on this slot, releasing the lock
    /// meanwhile. Returns `false` once `deadline` has passed; `None` waits
    /// without a deadline.
    pub(crate) fn wait_until(&self, state: &mut MutexGuard<'_, SlotState>, deadline: Option<Instant>) -> bool {
        match deadline {
            Some(deadline) => !self.completed.wait_until(state, deadline).timed_out(),
            None => {
                self.completed.wait(state);
                true
            }
        }
    }
}

impl SlotState {
    fn begin_frame(&mut self, index: usize, ring_len: usize, datagram: &Datagram<'_>, now: Instant) -> Ingested {
        if datagram.seq != 0 {
            tracing::debug!(slot = index, seq = datagram.seq, "HEADER datagram with non-zero sequence");
            return Ingested::Dropped(DropReason::InconsistentHeader);
        }
        let header = match FrameHeader::decode(datagram.payload) {
            Ok(header) => header,
            Err(e) => {
                tracing::debug!(slot = index, error = %e, "undecodable frame header");
                return Ingested::Dropped(DropReason::InconsistentHeader);
            }
        };

        let layout = FrameLayout::for_header(&header);
        if header.frame_seq as usize % ring_len != index
            || !layout.accepts_packet_count(header.packets_per_frame)
            || layout.frame_size() > self.data.len()
            || layout.packets > self.received.len() * 64
        {
            tracing::warn!(
                slot = index,
                frame_seq = header.frame_seq,
                packets_per_frame = header.packets_per_frame,
                expected_packets = layout.packets,
                frame_size = layout.frame_size(),
                slot_capacity = self.data.len(),
                "inconsistent frame header"
            );
            return Ingested::Dropped(DropReason::InconsistentHeader);
        }

        if let Some(current) = self.stats.frame_seq {
            if current == header.frame_seq {
                return Ingested::Dropped(DropReason::Duplicate);
            }
            if !is_newer(header.frame_seq, Some(current)) {
                tracing::debug!(slot = index, current, frame_seq = header.frame_seq, "stale frame header");
                return Ingested::Dropped(DropReason::Stale);
            }
            if !self.stats.complete {
                tracing::debug!(
                    slot = index,
                    overwritten = current,
                    packets = self.stats.packets,
                    frame_seq = header.frame_seq,
                    "incomplete frame overwritten"
                );
            }
        }

        let head = HEADER_SIZE + layout.audio_prefix;
        self.data[..head].copy_from_slice(&datagram.payload[..head]);
        self.received.fill(0);
        self.mark_received(0);

        let frame_seq = header.frame_seq;
        self.stats = FrameStats {
            frame_seq: Some(frame_seq),
            packets: 1,
            first_arrival: Some(now),
            completed_at: None,
            complete: false,
        };
        self.header = Some(header);
        self.layout = layout;

        tracing::trace!(slot = index, frame_seq, packets = layout.packets, "frame started");

        if layout.packets == 1 {
            self.finish(now);
            return Ingested::Completed { slot: index, frame_seq };
        }
        Ingested::Started { slot: index, frame_seq }
    }

    fn write_payload(&mut self, index: usize, datagram: &Datagram<'_>, now: Instant) -> Ingested {
        let Some(frame_seq) = self.stats.frame_seq else {
            tracing::trace!(slot = index, seq = datagram.seq, "payload before HEADER");
            return Ingested::Dropped(DropReason::Orphan);
        };

        let placement = match self.layout.placement(datagram.kind, datagram.seq) {
            Ok(placement) => placement,
            Err(e @ TransportError::BoundsViolation { .. }) => {
                tracing::warn!(slot = index, frame_seq, seq = datagram.seq, error = %e, "write rejected");
                return Ingested::Dropped(DropReason::OutOfBounds);
            }
            Err(e) => {
                tracing::debug!(slot = index, frame_seq, seq = datagram.seq, error = %e, "misplaced datagram");
                return Ingested::Dropped(DropReason::Invalid);
            }
        };

        let seq = datagram.seq as usize;
        let start = self.layout.region_start(placement.region) + placement.offset;
        self.data[start..start + placement.len].copy_from_slice(&datagram.payload[..placement.len]);
        if self.is_received(seq) {
            tracing::trace!(slot = index, frame_seq, seq, "payload rewritten");
            return Ingested::Rewritten { slot: index };
        }
        self.mark_received(seq);
        self.stats.packets += 1;

        if self.stats.packets as usize == self.layout.packets {
            self.finish(now);
            return Ingested::Completed { slot: index, frame_seq };
        }
        Ingested::Accepted { slot: index }
    }

    fn finish(&mut self, now: Instant) {
        self.stats.complete = true;
        self.stats.completed_at = Some(now);
    }

    fn is_received(&self, seq: usize) -> bool {
        self.received[seq / 64] & (1 << (seq % 64)) != 0
    }

    fn mark_received(&mut self, seq: usize) {
        self.received[seq / 64] |= 1 << (seq % 64);
    }

    pub(crate) fn stats(&self) -> &FrameStats {
        &self.stats
    }

    /// Complete and newer than `last`.
    pub(crate) fn is_complete_after(&self, last: Option<u32>) -> bool {
        self.stats.complete && self.stats.frame_seq.is_some_and(|seq| is_newer(seq, last))
    }

    /// Incomplete but usable: HEADER present, at least `min_packets`
    /// datagrams, and newer than `last`.
    pub(crate) fn is_partial_after(&self, last: Option<u32>, min_packets: u16) -> bool {
        self.header.is_some()
            && self.stats.packets >= min_packets
            && self.stats.frame_seq.is_some_and(|seq| is_newer(seq, last))
    }

    /// Datagrams seen so far for a frame newer than `last`, otherwise 0.
    pub(crate) fn pending_packets(&self, last: Option<u32>) -> u16 {
        match self.stats.frame_seq {
            Some(seq) if is_newer(seq, last) => self.stats.packets,
            _ => 0,
        }
    }

    /// Copy the frame out into `out`, reusing its allocations.
    ///
    /// Returns the frame sequence number, or `None` if no HEADER arrived.
    pub(crate) fn copy_into(&self, out: &mut Frame) -> Option<u32> {
        let header = self.header.as_ref()?;
        let audio = self.layout.region_start(Region::Audio);
        let video = self.layout.region_start(Region::Video);

        out.header.clone_from(header);
        out.audio.clear();
        out.audio.extend_from_slice(&self.data[audio..audio + self.layout.audio_size]);
        out.video.clear();
        out.video.extend_from_slice(&self.data[video..video + self.layout.video_size]);
        out.packets_received = self.stats.packets;
        out.complete = self.stats.complete;
        out.first_arrival = self.stats.first_arrival;
        out.completed_at = self.stats.completed_at;
        Some(header.frame_seq)
    }

    /// Forget the frame after delivery. The bytes stay until overwritten.
    pub(crate) fn reset(&mut self) {
        self.header = None;
        self.layout = FrameLayout::default();
        self.received.fill(0);
        self.stats = FrameStats::default();
    }
}
