use crate::error::{Result, TransportError};

/// Total size of every datagram on the wire.
pub const DATAGRAM_SIZE: usize = 1475;

/// Sync byte, flags/slot byte and the 16-bit in-frame sequence number.
pub const DATAGRAM_PREFIX_SIZE: usize = 4;

/// Payload bytes available in each datagram.
pub const PAYLOAD_SIZE: usize = DATAGRAM_SIZE - DATAGRAM_PREFIX_SIZE;

/// Value of byte 0 in every valid datagram.
pub const SYNC_BYTE: u8 = 0x47;

pub const FLAG_HEADER: u8 = 0x80;
pub const FLAG_AUDIO: u8 = 0x40;
pub const FLAG_VIDEO: u8 = 0x20;

/// Low bits of byte 1 that carry the ring slot index.
pub const SLOT_MASK: u8 = 0x1f;

/// Largest ring that the slot bits can address.
pub const MAX_RING_SLOTS: usize = SLOT_MASK as usize + 1;

/// Datagram classification by sync byte, length and flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramKind {
    Header,
    Audio,
    Video,
    Invalid,
}

impl DatagramKind {
    fn flag(self) -> u8 {
        match self {
            Self::Header => FLAG_HEADER,
            Self::Audio => FLAG_AUDIO,
            Self::Video => FLAG_VIDEO,
            Self::Invalid => 0,
        }
    }
}

/// Classify a received datagram.
///
/// `Invalid` when the length is not exactly [`DATAGRAM_SIZE`], the sync
/// byte is wrong, or the flag bits are not exactly one of
/// HEADER/AUDIO/VIDEO. This is the only hard validation on the receive path.
pub fn classify(datagram: &[u8]) -> DatagramKind {
    if datagram.len() != DATAGRAM_SIZE || datagram[0] != SYNC_BYTE {
        return DatagramKind::Invalid;
    }
    match datagram[1] & !SLOT_MASK {
        FLAG_HEADER => DatagramKind::Header,
        FLAG_AUDIO => DatagramKind::Audio,
        FLAG_VIDEO => DatagramKind::Video,
        _ => DatagramKind::Invalid,
    }
}

/// A validated datagram borrowed from a receive buffer.
///
/// ```text
/// byte 0     byte 1              bytes 2-3              bytes 4..1475
/// +--------+---------+--------+----------------------+----------------
/// |  0x47  | H|A|V|  | slot   | in-frame seq (native)|  payload ...
/// +--------+---------+--------+----------------------+----------------
/// ```
///
/// The in-frame sequence number is written in host byte order. Peers of
/// different endianness do not interoperate; this matches the deployed
/// protocol and is kept as is.
#[derive(Debug, Clone, Copy)]
pub struct Datagram<'a> {
    /// Never [`DatagramKind::Invalid`].
    pub kind: DatagramKind,
    /// Target ring slot (frame sequence modulo ring size).
    pub slot: u8,
    /// 0-based datagram index within its frame.
    pub seq: u16,
    /// The [`PAYLOAD_SIZE`] bytes after the prefix.
    pub payload: &'a [u8],
}

impl<'a> Datagram<'a> {
    pub fn parse(datagram: &'a [u8]) -> Result<Self> {
        let kind = classify(datagram);
        if kind == DatagramKind::Invalid {
            return Err(TransportError::InvalidDatagram {
                len: datagram.len(),
            });
        }
        Ok(Self {
            kind,
            slot: datagram[1] & SLOT_MASK,
            seq: u16::from_ne_bytes([datagram[2], datagram[3]]),
            payload: &datagram[DATAGRAM_PREFIX_SIZE..],
        })
    }
}

/// Write the 4-byte prefix into the start of `buf`.
///
/// `slot` must already be reduced modulo the ring size.
pub fn write_prefix(buf: &mut [u8], kind: DatagramKind, slot: u8, seq: u16) {
    debug_assert!(kind != DatagramKind::Invalid);
    debug_assert!(slot <= SLOT_MASK);
    buf[0] = SYNC_BYTE;
    buf[1] = kind.flag() | (slot & SLOT_MASK);
    buf[2..4].copy_from_slice(&seq.to_ne_bytes());
}
