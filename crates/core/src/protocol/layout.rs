use crate::error::{Region, Result, TransportError};

use super::datagram::{DATAGRAM_SIZE, DatagramKind, PAYLOAD_SIZE};
use super::header::{FrameHeader, HEADER_SIZE};

/// How one logical frame maps onto datagrams.
///
/// ```text
/// seq 0                 1 .. first_video_seq-1     first_video_seq .. packets-1
/// [prefix|hdr|audio..]  [prefix|audio........]     [prefix|video........]
/// ```
///
/// Datagram 0 carries the serialized header followed by up to
/// `PAYLOAD_SIZE - HEADER_SIZE` bytes of audio. Remaining audio fills
/// AUDIO datagrams, then video fills VIDEO datagrams. The last datagram of
/// each region may be partially used.
///
/// Within a reassembly buffer the regions sit back to back:
/// header at 0, audio at [`HEADER_SIZE`], video right after the audio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameLayout {
    pub audio_size: usize,
    pub video_size: usize,
    /// Audio bytes carried in datagram 0 after the header.
    pub audio_prefix: usize,
    /// In-frame sequence number of the first VIDEO datagram.
    pub first_video_seq: usize,
    /// Exact number of datagrams the frame occupies.
    pub packets: usize,
}

/// Where a payload datagram lands inside its region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub region: Region,
    /// Byte offset within the region.
    pub offset: usize,
    /// Bytes of the payload that belong to the frame.
    pub len: usize,
}

impl FrameLayout {
    pub fn new(audio_size: usize, video_size: usize) -> Self {
        let audio_prefix = audio_size.min(PAYLOAD_SIZE - HEADER_SIZE);
        let audio_datagrams = (audio_size - audio_prefix).div_ceil(PAYLOAD_SIZE);
        let first_video_seq = 1 + audio_datagrams;
        Self {
            audio_size,
            video_size,
            audio_prefix,
            first_video_seq,
            packets: first_video_seq + video_size.div_ceil(PAYLOAD_SIZE),
        }
    }

    pub fn for_header(header: &FrameHeader) -> Self {
        Self::new(header.audio_size as usize, header.video_size())
    }

    /// Bytes needed to hold header, audio and video contiguously.
    pub fn frame_size(&self) -> usize {
        HEADER_SIZE + self.audio_size + self.video_size
    }

    /// The `packets_per_frame` value a sender writes into the header:
    /// `ceil((HEADER_SIZE + audio + video) / PAYLOAD_SIZE)`.
    ///
    /// This ignores the unused tail of the last AUDIO datagram, so it can
    /// be one less than [`FrameLayout::packets`].
    pub fn declared_packets(&self) -> usize {
        self.frame_size().div_ceil(PAYLOAD_SIZE)
    }

    /// Whether a received `packets_per_frame` fits this layout. Both the
    /// aggregate count and the exact datagram count are accepted.
    pub fn accepts_packet_count(&self, packets_per_frame: u16) -> bool {
        let declared = packets_per_frame as usize;
        declared != 0 && (declared == self.packets || declared == self.declared_packets())
    }

    /// Bytes actually put on the wire for this frame.
    pub fn wire_size(&self) -> usize {
        self.packets * DATAGRAM_SIZE
    }

    /// Start of `region` within a contiguous frame buffer.
    pub fn region_start(&self, region: Region) -> usize {
        match region {
            Region::Header => 0,
            Region::Audio => HEADER_SIZE,
            Region::Video => HEADER_SIZE + self.audio_size,
        }
    }

    pub fn region_size(&self, region: Region) -> usize {
        match region {
            Region::Header => HEADER_SIZE,
            Region::Audio => self.audio_size,
            Region::Video => self.video_size,
        }
    }

    /// Compute where an AUDIO or VIDEO datagram's payload belongs.
    ///
    /// Every write is checked against the declared region size before it
    /// happens: an offset at or past the end of the region is a
    /// [`TransportError::BoundsViolation`], and the returned length is
    /// clamped so the write never spills into the next region. A payload
    /// datagram numbered 0, or a VIDEO datagram numbered inside the audio
    /// range, contradicts the layout and is reported as invalid.
    pub fn placement(&self, kind: DatagramKind, seq: u16) -> Result<Placement> {
        let seq = seq as usize;
        let (region, offset) = match kind {
            DatagramKind::Audio if seq >= 1 => (Region::Audio, self.audio_prefix + (seq - 1) * PAYLOAD_SIZE),
            DatagramKind::Video if seq >= self.first_video_seq => {
                (Region::Video, (seq - self.first_video_seq) * PAYLOAD_SIZE)
            }
            _ => return Err(TransportError::InvalidDatagram { len: DATAGRAM_SIZE }),
        };

        let limit = self.region_size(region);
        if offset >= limit {
            return Err(TransportError::BoundsViolation {
                region,
                offset,
                limit,
            });
        }

        Ok(Placement {
            region,
            offset,
            len: PAYLOAD_SIZE.min(limit - offset),
        })
    }
}
