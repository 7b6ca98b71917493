use std::net::SocketAddr;

use crate::config::SenderConfig;
use crate::error::Result;
use crate::media::{FramePacketizer, OutgoingFrame, send_frame};
use crate::transport::Endpoint;

/// Sending side of a preview stream.
///
/// Holds a connected endpoint and a packetizer that reuses one datagram
/// buffer across frames. Sending is synchronous: [`send_frame`](Self::send_frame)
/// returns after the last datagram of the frame has been handed to the
/// kernel.
pub struct Sender {
    endpoint: Endpoint,
    packetizer: FramePacketizer,
    config: SenderConfig,
}

impl Sender {
    pub fn open(address: &str, port: u16) -> Result<Self> {
        Self::with_config(address, port, SenderConfig::default())
    }

    pub fn with_config(address: &str, port: u16, config: SenderConfig) -> Result<Self> {
        config.validate()?;
        let endpoint = Endpoint::open_streaming_sender(
            address,
            port,
            config.send_buffer_size,
            config.multicast_hops,
        )?;
        let packetizer = FramePacketizer::new(config.ring_slots)?;
        Ok(Self {
            endpoint,
            packetizer,
            config,
        })
    }

    /// Packetize and send one frame. Returns the bytes written.
    pub fn send_frame(&mut self, frame: &OutgoingFrame<'_>) -> Result<usize> {
        let written = send_frame(&self.endpoint, &mut self.packetizer, frame)?;
        tracing::trace!(frame_seq = frame.frame_seq, written, "frame sent");
        Ok(written)
    }

    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.endpoint.local_addr()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.endpoint.peer_addr()
    }
}
