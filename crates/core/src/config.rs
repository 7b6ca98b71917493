use std::time::Duration;

use crate::error::{Result, TransportError};
use crate::protocol::{MAX_RING_SLOTS, video_size};

/// Ring slots used by sender and receiver unless configured otherwise.
/// Both ends must agree, since the slot index travels in every datagram.
pub const DEFAULT_RING_SLOTS: usize = 8;

/// Datagrams that must have arrived before a timed-out frame is handed
/// out as a partial frame.
pub const DEFAULT_MIN_PARTIAL_PACKETS: u16 = 5;

pub const DEFAULT_SOCKET_BUFFER_SIZE: usize = 8 * 1024 * 1024;

/// Receiver-side configuration.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Number of reusable frame slots (1..=32).
    pub ring_slots: usize,
    /// Largest video payload a slot can hold, in bytes.
    pub max_video_size: usize,
    /// Minimum datagrams for a partial delivery after a timeout.
    pub min_partial_packets: u16,
    /// Requested kernel receive buffer size.
    pub recv_buffer_size: usize,
    /// How long the ingestion loop blocks in one receive before it
    /// re-checks its cancellation flag.
    pub poll_interval: Duration,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            ring_slots: DEFAULT_RING_SLOTS,
            max_video_size: video_size(1280, 720),
            min_partial_packets: DEFAULT_MIN_PARTIAL_PACKETS,
            recv_buffer_size: DEFAULT_SOCKET_BUFFER_SIZE,
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl ReceiverConfig {
    /// Size the slots for frames up to `width` x `height`.
    pub fn with_max_resolution(mut self, width: u16, height: u16) -> Self {
        self.max_video_size = video_size(width, height);
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_ring_slots(self.ring_slots)?;
        if self.poll_interval.is_zero() {
            return Err(TransportError::Config("poll_interval must be non-zero".into()));
        }
        Ok(())
    }
}

/// Sender-side configuration.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Must match the receivers' `ring_slots`.
    pub ring_slots: usize,
    /// Requested kernel send buffer size.
    pub send_buffer_size: usize,
    /// TTL / hop limit for multicast destinations.
    pub multicast_hops: u32,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            ring_slots: DEFAULT_RING_SLOTS,
            send_buffer_size: DEFAULT_SOCKET_BUFFER_SIZE,
            multicast_hops: 1,
        }
    }
}

impl SenderConfig {
    pub fn validate(&self) -> Result<()> {
        validate_ring_slots(self.ring_slots)?;
        if self.multicast_hops > 255 {
            return Err(TransportError::Config(format!(
                "multicast_hops must be at most 255, got {}",
                self.multicast_hops
            )));
        }
        Ok(())
    }
}

pub(crate) fn validate_ring_slots(slots: usize) -> Result<()> {
    if slots == 0 || slots > MAX_RING_SLOTS {
        return Err(TransportError::Config(format!(
            "ring_slots must be within 1..={MAX_RING_SLOTS}, got {slots}"
        )));
    }
    Ok(())
}
