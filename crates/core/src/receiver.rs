use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::ReceiverConfig;
use crate::consumer::FrameConsumer;
use crate::error::{Region, Result, TransportError};
use crate::ingest::{IngestLoop, IngestStats};
use crate::media::{Frame, SyncFrame};
use crate::protocol::{DATAGRAM_SIZE, Datagram, DatagramKind, FrameHeader, FrameLayout, HEADER_SIZE};
use crate::ring::FrameRing;
use crate::transport::{Endpoint, RECV_BUFFER_LEN};

/// Receiving side of a preview stream.
///
/// Owns the endpoint, the frame ring and the consumer cursor. Frames are
/// retrieved in one of two modes:
///
/// - **Buffered**: [`start`](Self::start) spawns the ingestion thread, then
///   [`next_frame`](Self::next_frame) serves whatever frame occupies the
///   cursor slot.
/// - **Unbuffered**: without the ingestion thread,
///   [`read_frame_header`](Self::read_frame_header) and
///   [`read_frame_audio_video`](Self::read_frame_audio_video) read datagrams
///   directly into caller-supplied buffers.
pub struct Receiver {
    endpoint: Arc<Endpoint>,
    ring: Arc<FrameRing>,
    consumer: FrameConsumer,
    ingest: Option<IngestLoop>,
    config: ReceiverConfig,
    /// HEADER datagram held back for the next unbuffered read.
    pending: Option<Vec<u8>>,
    scratch: Box<[u8; RECV_BUFFER_LEN]>,
}

impl Receiver {
    /// Listen on `address:port` with the default configuration.
    pub fn open(address: &str, port: u16) -> Result<Self> {
        Self::with_config(address, port, ReceiverConfig::default())
    }

    pub fn with_config(address: &str, port: u16, config: ReceiverConfig) -> Result<Self> {
        config.validate()?;
        let endpoint = Endpoint::open_multicast_receiver(address, port, config.recv_buffer_size)?;
        Self::from_endpoint(endpoint, config)
    }

    /// Wrap an already opened endpoint.
    pub fn from_endpoint(endpoint: Endpoint, config: ReceiverConfig) -> Result<Self> {
        config.validate()?;
        let ring = Arc::new(FrameRing::new(config.ring_slots, config.max_video_size)?);
        let consumer = FrameConsumer::with_min_partial_packets(ring.clone(), config.min_partial_packets);

        Ok(Self {
            endpoint: Arc::new(endpoint),
            ring,
            consumer,
            ingest: None,
            config,
            pending: None,
            scratch: Box::new([0u8; RECV_BUFFER_LEN]),
        })
    }

    /// Spawn the background ingestion loop.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(TransportError::AlreadyRunning);
        }
        // A loop that died on a socket error is reaped before restarting.
        if let Some(dead) = self.ingest.take()
            && let Err(e) = dead.stop()
        {
            tracing::warn!(error = %e, "previous ingestion loop had failed");
        }
        if self.pending.take().is_some() {
            tracing::debug!("discarding held-back HEADER datagram");
        }

        let ingest = IngestLoop::spawn(self.endpoint.clone(), self.ring.clone(), self.config.poll_interval)?;
        self.ingest = Some(ingest);
        tracing::info!(addr = ?self.endpoint.local_addr().ok(), slots = self.ring.len(), "receiver started");
        Ok(())
    }

    /// Stop the ingestion loop and return its counters.
    pub fn stop(&mut self) -> Result<IngestStats> {
        let ingest = self.ingest.take().ok_or(TransportError::NotStarted)?;
        let stats = ingest.stop()?;
        tracing::info!(
            datagrams = stats.datagrams,
            completed = stats.frames_completed,
            dropped = stats.dropped(),
            "receiver stopped"
        );
        Ok(stats)
    }

    pub fn is_running(&self) -> bool {
        self.ingest.as_ref().is_some_and(IngestLoop::is_running)
    }

    /// Buffered mode: wait up to `timeout` for the frame at the cursor.
    pub fn next_frame(&mut self, timeout: Duration) -> Result<Frame> {
        self.ensure_buffered()?;
        self.consumer.next_frame(timeout)
    }

    /// Buffered mode, reusing `out`'s buffers.
    pub fn next_frame_into(&mut self, timeout: Duration, out: &mut Frame) -> Result<()> {
        self.ensure_buffered()?;
        self.consumer.next_frame_into(timeout, out)
    }

    /// Block until a HEADER datagram arrives and return its header.
    ///
    /// Intended for sizing buffers before
    /// [`read_frame_audio_video`](Self::read_frame_audio_video); the
    /// datagram is kept and replayed by that call, so the frame whose
    /// header was read here is not lost.
    pub fn read_frame_header(&mut self) -> Result<FrameHeader> {
        self.ensure_unbuffered()?;
        loop {
            let Some(len) = self.next_datagram(None)? else {
                continue;
            };
            let Ok(datagram) = Datagram::parse(&self.scratch[..len]) else {
                continue;
            };
            if datagram.kind != DatagramKind::Header {
                continue;
            }
            if let Some(header) = self.accept_header(&datagram) {
                self.pending = Some(self.scratch[..len].to_vec());
                return Ok(header);
            }
        }
    }

    /// Unbuffered mode: assemble one frame straight into `audio` and
    /// `video`.
    ///
    /// Ends when every datagram of the frame's layout has arrived, or when a
    /// HEADER for another frame shows up first. In that case a frame with
    /// fewer than 2 datagrams is abandoned for the new one; otherwise the
    /// incomplete frame is returned and the new HEADER is kept for the next
    /// call. After `timeout`, an incomplete frame with at least the
    /// configured minimum of datagrams is returned; otherwise
    /// [`TransportError::Timeout`]. A timeout too large to add to the
    /// current instant waits without a deadline.
    ///
    /// Writes beyond the length of `audio` or `video` are dropped, so the
    /// buffers should be sized from [`read_frame_header`](Self::read_frame_header).
    pub fn read_frame_audio_video(
        &mut self,
        timeout: Duration,
        audio: &mut [u8],
        video: &mut [u8],
    ) -> Result<SyncFrame> {
        self.ensure_unbuffered()?;
        let deadline = Instant::now().checked_add(timeout);
        let mut assembly: Option<SyncAssembly> = None;

        while let Some(len) = self.next_datagram(deadline)? {
            let Ok(datagram) = Datagram::parse(&self.scratch[..len]) else {
                continue;
            };

            if datagram.kind == DatagramKind::Header {
                let Some(header) = self.accept_header(&datagram) else {
                    continue;
                };
                if let Some(current) = &assembly {
                    if current.header.frame_seq == header.frame_seq {
                        continue;
                    }
                    if current.packets >= 2 {
                        tracing::debug!(
                            frame_seq = current.header.frame_seq,
                            packets = current.packets,
                            next = header.frame_seq,
                            "frame cut short by next HEADER"
                        );
                        self.pending = Some(self.scratch[..len].to_vec());
                        return Ok(current.to_sync_frame());
                    }
                    tracing::debug!(frame_seq = current.header.frame_seq, "abandoning header-only frame");
                }
                let started = SyncAssembly::start(header, &datagram, audio);
                if started.is_complete() {
                    return Ok(started.to_sync_frame());
                }
                assembly = Some(started);
                continue;
            }

            let Some(current) = assembly.as_mut() else {
                continue;
            };
            if datagram.slot as usize != current.header.frame_seq as usize % self.config.ring_slots {
                continue;
            }
            if current.write(&datagram, audio, video) && current.is_complete() {
                return Ok(current.to_sync_frame());
            }
        }

        match assembly {
            Some(current) if current.packets >= self.config.min_partial_packets => {
                tracing::debug!(
                    frame_seq = current.header.frame_seq,
                    packets = current.packets,
                    expected = current.layout.packets,
                    "returning partial frame"
                );
                Ok(current.to_sync_frame())
            }
            Some(current) => Err(TransportError::Timeout {
                packets: current.packets,
            }),
            None => Err(TransportError::Timeout { packets: 0 }),
        }
    }

    /// The ring shared with the ingestion loop.
    pub fn ring(&self) -> &Arc<FrameRing> {
        &self.ring
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        self.endpoint.local_addr()
    }

    fn ensure_buffered(&self) -> Result<()> {
        if self.ingest.is_none() {
            return Err(TransportError::NotStarted);
        }
        Ok(())
    }

    fn ensure_unbuffered(&self) -> Result<()> {
        if self.ingest.is_some() {
            return Err(TransportError::AlreadyRunning);
        }
        Ok(())
    }

    /// Next fixed-size datagram into `scratch`, held-back datagram first.
    ///
    /// `None` once `deadline` has passed; blocks indefinitely without one.
    fn next_datagram(&mut self, deadline: Option<Instant>) -> Result<Option<usize>> {
        if let Some(pending) = self.pending.take() {
            self.scratch[..pending.len()].copy_from_slice(&pending);
            return Ok(Some(pending.len()));
        }

        loop {
            let timeout = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(None);
                    }
                    Some(remaining)
                }
                None => None,
            };
            match self.endpoint.recv_datagram(&mut self.scratch[..], timeout)? {
                Some(DATAGRAM_SIZE) => return Ok(Some(DATAGRAM_SIZE)),
                Some(len) => tracing::debug!(len, "dropping datagram of unexpected length"),
                None => {}
            }
        }
    }

    /// Decode a HEADER datagram and check it the way the ring does.
    fn accept_header(&self, datagram: &Datagram<'_>) -> Option<FrameHeader> {
        if datagram.seq != 0 {
            return None;
        }
        let header = FrameHeader::decode(datagram.payload).ok()?;
        let layout = FrameLayout::for_header(&header);
        let consistent = layout.accepts_packet_count(header.packets_per_frame)
            && header.frame_seq as usize % self.config.ring_slots == datagram.slot as usize;
        if !consistent {
            tracing::warn!(
                frame_seq = header.frame_seq,
                packets_per_frame = header.packets_per_frame,
                expected_packets = layout.packets,
                "inconsistent frame header"
            );
            return None;
        }
        Some(header)
    }
}

/// Reassembly state of one frame in unbuffered mode.
struct SyncAssembly {
    header: FrameHeader,
    layout: FrameLayout,
    received: Vec<u64>,
    packets: u16,
}

impl SyncAssembly {
    fn start(header: FrameHeader, datagram: &Datagram<'_>, audio: &mut [u8]) -> Self {
        let layout = FrameLayout::for_header(&header);
        copy_clamped(audio, 0, &datagram.payload[HEADER_SIZE..HEADER_SIZE + layout.audio_prefix]);

        let mut received = vec![0u64; layout.packets.div_ceil(64)];
        received[0] = 1;
        Self {
            header,
            layout,
            received,
            packets: 1,
        }
    }

    /// Place a payload datagram. A repeated seq overwrites the earlier
    /// bytes. Returns `false` if it was not counted.
    fn write(&mut self, datagram: &Datagram<'_>, audio: &mut [u8], video: &mut [u8]) -> bool {
        let placement = match self.layout.placement(datagram.kind, datagram.seq) {
            Ok(placement) => placement,
            Err(e) => {
                tracing::debug!(frame_seq = self.header.frame_seq, seq = datagram.seq, error = %e, "write rejected");
                return false;
            }
        };

        let target = match placement.region {
            Region::Audio => audio,
            Region::Video => video,
            Region::Header => return false,
        };
        copy_clamped(target, placement.offset, &datagram.payload[..placement.len]);

        let seq = datagram.seq as usize;
        let bit = 1u64 << (seq % 64);
        if self.received[seq / 64] & bit != 0 {
            return false;
        }
        self.received[seq / 64] |= bit;
        self.packets += 1;
        true
    }

    fn is_complete(&self) -> bool {
        self.packets as usize == self.layout.packets
    }

    fn to_sync_frame(&self) -> SyncFrame {
        SyncFrame {
            header: self.header.clone(),
            packets_received: self.packets,
            complete: self.is_complete(),
        }
    }
}

fn copy_clamped(dst: &mut [u8], offset: usize, src: &[u8]) {
    if offset >= dst.len() {
        return;
    }
    let len = src.len().min(dst.len() - offset);
    dst[offset..offset + len].copy_from_slice(&src[..len]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receiver() -> Receiver {
        Receiver::with_config("127.0.0.1", 0, ReceiverConfig::default().with_max_resolution(64, 64)).unwrap()
    }

    #[test]
    fn lifecycle_errors() {
        let mut rx = receiver();
        assert!(!rx.is_running());
        assert!(matches!(rx.stop(), Err(TransportError::NotStarted)));
        assert!(matches!(rx.next_frame(Duration::ZERO), Err(TransportError::NotStarted)));

        rx.start().unwrap();
        assert!(rx.is_running());
        assert!(matches!(rx.start(), Err(TransportError::AlreadyRunning)));
        let mut audio = [0u8; 4];
        let mut video = [0u8; 4];
        assert!(matches!(
            rx.read_frame_audio_video(Duration::ZERO, &mut audio, &mut video),
            Err(TransportError::AlreadyRunning)
        ));

        rx.stop().unwrap();
        assert!(!rx.is_running());
    }

    #[test]
    fn unbuffered_read_times_out() {
        let mut rx = receiver();
        let mut audio = [0u8; 4];
        let mut video = [0u8; 4];
        let err = rx
            .read_frame_audio_video(Duration::from_millis(20), &mut audio, &mut video)
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout { packets: 0 }));
    }

    #[test]
    fn invalid_config_rejected() {
        let config = ReceiverConfig {
            ring_slots: 0,
            ..Default::default()
        };
        assert!(matches!(
            Receiver::with_config("127.0.0.1", 0, config),
            Err(TransportError::Config(_))
        ));
    }

    #[test]
    fn clamped_copy_stays_in_bounds() {
        let mut dst = [0u8; 4];
        copy_clamped(&mut dst, 2, &[1, 2, 3]);
        assert_eq!(dst, [0, 0, 1, 2]);
        copy_clamped(&mut dst, 9, &[7]);
        assert_eq!(dst, [0, 0, 1, 2]);
    }
}
