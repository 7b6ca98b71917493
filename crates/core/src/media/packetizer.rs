use crate::config::validate_ring_slots;
use crate::error::{Region, Result, TransportError};
use crate::protocol::datagram::{DATAGRAM_PREFIX_SIZE, write_prefix};
use crate::protocol::{
    DATAGRAM_SIZE, DatagramKind, FrameHeader, FrameLayout, HEADER_SIZE, PAYLOAD_SIZE,
};
use crate::transport::Endpoint;

use super::frame::OutgoingFrame;

/// Splits one logical frame into a deterministic run of datagrams.
///
/// ```text
/// seq 0:                 HEADER  FrameHeader + audio[..prefix]
/// seq 1..first_video:    AUDIO   next PAYLOAD_SIZE bytes of audio
/// seq first_video..n:    VIDEO   next PAYLOAD_SIZE bytes of video
/// ```
///
/// In-frame sequence numbers start at 0 and increase by one per datagram.
/// The unused tail of a partially filled datagram is zeroed.
#[derive(Debug)]
pub struct FramePacketizer {
    ring_slots: usize,
    scratch: Box<[u8; DATAGRAM_SIZE]>,
}

impl FramePacketizer {
    /// `ring_slots` must match the receiver's ring size.
    pub fn new(ring_slots: usize) -> Result<Self> {
        validate_ring_slots(ring_slots)?;
        Ok(Self {
            ring_slots,
            scratch: Box::new([0u8; DATAGRAM_SIZE]),
        })
    }

    pub fn ring_slots(&self) -> usize {
        self.ring_slots
    }

    /// Build and validate the wire header for `frame`.
    pub fn header_for(&self, frame: &OutgoingFrame<'_>) -> Result<FrameHeader> {
        let mut header = FrameHeader {
            frame_seq: frame.frame_seq,
            packets_per_frame: 0,
            audio_size: 0,
            width: frame.width,
            height: frame.height,
            vitc: frame.vitc,
            ltc: frame.ltc,
            fps_num: frame.fps_num,
            fps_den: frame.fps_den,
            signal: frame.signal,
            audio_channels: frame.audio_channels,
            source_name: frame.source_name.to_string(),
        };

        let declared = header.video_size();
        if frame.video.len() != declared {
            return Err(TransportError::FrameSizeMismatch {
                region: Region::Video,
                actual: frame.video.len(),
                declared,
            });
        }
        header.audio_size = u16::try_from(frame.audio.len()).map_err(|_| {
            TransportError::FrameTooLarge(format!("{} audio bytes", frame.audio.len()))
        })?;

        // In-frame sequence numbers are 16-bit, so the exact count must fit
        // even though the header carries the aggregate one.
        let layout = FrameLayout::for_header(&header);
        let too_large = |_| TransportError::FrameTooLarge(format!("{} datagrams", layout.packets));
        u16::try_from(layout.packets).map_err(too_large)?;
        header.packets_per_frame = u16::try_from(layout.declared_packets()).map_err(too_large)?;
        Ok(header)
    }

    /// Packetize `frame`, handing each finished datagram to `emit`.
    ///
    /// Returns the total number of bytes emitted.
    pub fn packetize<F>(&mut self, frame: &OutgoingFrame<'_>, mut emit: F) -> Result<usize>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        let header = self.header_for(frame)?;
        let layout = FrameLayout::for_header(&header);
        let slot = (frame.frame_seq as usize % self.ring_slots) as u8;
        let buf = &mut self.scratch[..];

        // Datagram 0: header plus the audio prefix.
        write_prefix(buf, DatagramKind::Header, slot, 0);
        let body = &mut buf[DATAGRAM_PREFIX_SIZE..];
        body[..HEADER_SIZE].copy_from_slice(&header.encode());
        body[HEADER_SIZE..HEADER_SIZE + layout.audio_prefix]
            .copy_from_slice(&frame.audio[..layout.audio_prefix]);
        body[HEADER_SIZE + layout.audio_prefix..].fill(0);
        emit(&buf[..])?;

        let mut seq: u16 = 1;
        let chunks = frame.audio[layout.audio_prefix..]
            .chunks(PAYLOAD_SIZE)
            .map(|chunk| (DatagramKind::Audio, chunk))
            .chain(
                frame
                    .video
                    .chunks(PAYLOAD_SIZE)
                    .map(|chunk| (DatagramKind::Video, chunk)),
            );
        for (kind, chunk) in chunks {
            write_prefix(buf, kind, slot, seq);
            let body = &mut buf[DATAGRAM_PREFIX_SIZE..];
            body[..chunk.len()].copy_from_slice(chunk);
            body[chunk.len()..].fill(0);
            emit(&buf[..])?;
            seq = seq.wrapping_add(1);
        }

        debug_assert_eq!(seq as usize, layout.packets);

        tracing::trace!(
            frame_seq = frame.frame_seq,
            slot,
            packets = layout.packets,
            audio = layout.audio_size,
            video = layout.video_size,
            "frame packetized"
        );

        Ok(layout.wire_size())
    }

    /// Packetize into owned datagrams.
    pub fn packetize_to_vec(&mut self, frame: &OutgoingFrame<'_>) -> Result<Vec<Vec<u8>>> {
        let mut datagrams = Vec::new();
        self.packetize(frame, |d| {
            datagrams.push(d.to_vec());
            Ok(())
        })?;
        Ok(datagrams)
    }
}

/// Packetize `frame` and transmit every datagram on `endpoint`.
///
/// Returns the total number of bytes written.
pub fn send_frame(
    endpoint: &Endpoint,
    packetizer: &mut FramePacketizer,
    frame: &OutgoingFrame<'_>,
) -> Result<usize> {
    packetizer.packetize(frame, |datagram| endpoint.send_datagram(datagram).map(|_| ()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Datagram, MAX_RING_SLOTS, video_size};

    fn video(width: u16, height: u16) -> Vec<u8> {
        (0..video_size(width, height)).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn rejects_bad_ring_size() {
        assert!(FramePacketizer::new(0).is_err());
        assert!(FramePacketizer::new(MAX_RING_SLOTS + 1).is_err());
        assert!(FramePacketizer::new(MAX_RING_SLOTS).is_ok());
    }

    #[test]
    fn datagram_sequence() {
        let mut packetizer = FramePacketizer::new(8).unwrap();
        let audio = vec![7u8; PAYLOAD_SIZE * 2];
        let video = video(64, 48);
        let frame = OutgoingFrame::new(11, 64, 48, &video, &audio);

        let datagrams = packetizer.packetize_to_vec(&frame).unwrap();
        let header = packetizer.header_for(&frame).unwrap();
        let layout = FrameLayout::for_header(&header);
        assert_eq!(datagrams.len(), layout.packets);
        assert_eq!(header.packets_per_frame as usize, layout.declared_packets());

        for (i, d) in datagrams.iter().enumerate() {
            assert_eq!(d.len(), DATAGRAM_SIZE);
            let parsed = Datagram::parse(d).unwrap();
            assert_eq!(parsed.seq as usize, i);
            assert_eq!(parsed.slot, 3);
            let expected = match i {
                0 => DatagramKind::Header,
                i if i < layout.first_video_seq => DatagramKind::Audio,
                _ => DatagramKind::Video,
            };
            assert_eq!(parsed.kind, expected);
        }
    }

    #[test]
    fn header_carries_audio_prefix() {
        let mut packetizer = FramePacketizer::new(4).unwrap();
        let audio: Vec<u8> = (0..200u8).collect();
        let video = video(2, 2);
        let frame = OutgoingFrame::new(1, 2, 2, &video, &audio).with_source_name("studio");

        let datagrams = packetizer.packetize_to_vec(&frame).unwrap();
        let first = Datagram::parse(&datagrams[0]).unwrap();
        let header = FrameHeader::decode(first.payload).unwrap();
        assert_eq!(header.audio_size, 200);
        assert_eq!(header.source_name, "studio");
        assert_eq!(&first.payload[HEADER_SIZE..HEADER_SIZE + 200], &audio[..]);
    }

    #[test]
    fn last_datagram_tail_zeroed() {
        let mut packetizer = FramePacketizer::new(4).unwrap();
        let video = vec![0xFFu8; video_size(16, 16)];
        let frame = OutgoingFrame::new(2, 16, 16, &video, &[]);

        let datagrams = packetizer.packetize_to_vec(&frame).unwrap();
        let last = Datagram::parse(datagrams.last().unwrap()).unwrap();
        let used = video.len() % PAYLOAD_SIZE;
        assert!(last.payload[..used].iter().all(|&b| b == 0xFF));
        assert!(last.payload[used..].iter().all(|&b| b == 0));
    }

    #[test]
    fn returns_wire_bytes() {
        let mut packetizer = FramePacketizer::new(4).unwrap();
        let video = video(32, 32);
        let frame = OutgoingFrame::new(0, 32, 32, &video, &[1, 2, 3]);
        let written = packetizer.packetize(&frame, |_| Ok(())).unwrap();
        let header = packetizer.header_for(&frame).unwrap();
        assert_eq!(written, FrameLayout::for_header(&header).packets * DATAGRAM_SIZE);
    }

    #[test]
    fn header_carries_aggregate_packet_count() {
        let packetizer = FramePacketizer::new(8).unwrap();
        let video = video(320, 180);
        let frame = OutgoingFrame::new(0, 320, 180, &video, &[]);
        let header = packetizer.header_for(&frame).unwrap();
        assert_eq!(header.packets_per_frame, 59);
        assert_eq!(FrameLayout::for_header(&header).packets, 60);
    }

    #[test]
    fn video_size_mismatch() {
        let packetizer = FramePacketizer::new(4).unwrap();
        let frame = OutgoingFrame::new(0, 32, 32, &[0u8; 10], &[]);
        assert!(matches!(
            packetizer.header_for(&frame),
            Err(TransportError::FrameSizeMismatch { region: Region::Video, actual: 10, .. })
        ));
    }

    #[test]
    fn oversized_audio() {
        let packetizer = FramePacketizer::new(4).unwrap();
        let audio = vec![0u8; u16::MAX as usize + 1];
        let frame = OutgoingFrame::new(0, 0, 0, &[], &audio);
        assert!(matches!(
            packetizer.header_for(&frame),
            Err(TransportError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn emit_error_stops_packetizing() {
        let mut packetizer = FramePacketizer::new(4).unwrap();
        let video = video(64, 64);
        let frame = OutgoingFrame::new(0, 64, 64, &video, &[]);
        let mut calls = 0;
        let result = packetizer.packetize(&frame, |_| {
            calls += 1;
            if calls == 2 {
                Err(TransportError::NotStarted)
            } else {
                Ok(())
            }
        });
        assert!(result.is_err());
        assert_eq!(calls, 2);
    }
}
