use crate::error::{Result, TransportError};

/// Length of the NUL-terminated source name field, terminator included.
pub const SOURCE_NAME_LEN: usize = 64;

/// Serialized size of a [`FrameHeader`] in bytes.
pub const HEADER_SIZE: usize = 26 + SOURCE_NAME_LEN;

/// Per-frame metadata carried at the start of datagram 0.
///
/// Serialized field by field, little-endian, with no padding:
///
/// ```text
/// offset  size  field
///      0     4  frame_seq
///      4     2  packets_per_frame
///      6     2  audio_size
///      8     2  width
///     10     2  height
///     12     4  vitc
///     16     4  ltc
///     20     2  fps_num
///     22     2  fps_den
///     24     1  signal (0 or 1)
///     25     1  audio_channels
///     26    64  source_name (NUL-terminated, zero padded)
/// ```
///
/// Decoding validates nothing beyond the buffer length. A zero
/// `packets_per_frame` or an absurd resolution decodes fine; the
/// reassembly path decides whether the header is usable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_seq: u32,
    pub packets_per_frame: u16,
    /// Audio payload length in bytes.
    pub audio_size: u16,
    pub width: u16,
    pub height: u16,
    /// Vertical interval timecode, opaque to the transport.
    pub vitc: u32,
    /// Linear timecode, opaque to the transport.
    pub ltc: u32,
    pub fps_num: u16,
    pub fps_den: u16,
    /// Whether the capture input had a valid signal.
    pub signal: bool,
    pub audio_channels: u8,
    pub source_name: String,
}

impl FrameHeader {
    /// Size in bytes of the planar 4:2:0 video payload this header declares.
    pub fn video_size(&self) -> usize {
        video_size(self.width, self.height)
    }

    /// Serialize into the fixed wire layout.
    ///
    /// Source names longer than `SOURCE_NAME_LEN - 1` bytes are truncated
    /// on a character boundary so the field always ends with a NUL.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.frame_seq.to_le_bytes());
        buf[4..6].copy_from_slice(&self.packets_per_frame.to_le_bytes());
        buf[6..8].copy_from_slice(&self.audio_size.to_le_bytes());
        buf[8..10].copy_from_slice(&self.width.to_le_bytes());
        buf[10..12].copy_from_slice(&self.height.to_le_bytes());
        buf[12..16].copy_from_slice(&self.vitc.to_le_bytes());
        buf[16..20].copy_from_slice(&self.ltc.to_le_bytes());
        buf[20..22].copy_from_slice(&self.fps_num.to_le_bytes());
        buf[22..24].copy_from_slice(&self.fps_den.to_le_bytes());
        buf[24] = self.signal as u8;
        buf[25] = self.audio_channels;

        let name = truncate_name(&self.source_name);
        if name.len() < self.source_name.len() {
            tracing::debug!(
                source_name = %self.source_name,
                kept = name.len(),
                "source name truncated to fit header"
            );
        }
        buf[26..26 + name.len()].copy_from_slice(name.as_bytes());
        buf
    }

    /// Parse a header from the first [`HEADER_SIZE`] bytes of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(TransportError::InvalidDatagram { len: buf.len() });
        }

        let name_field = &buf[26..HEADER_SIZE];
        let name_len = name_field
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(SOURCE_NAME_LEN);

        Ok(Self {
            frame_seq: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            packets_per_frame: u16::from_le_bytes([buf[4], buf[5]]),
            audio_size: u16::from_le_bytes([buf[6], buf[7]]),
            width: u16::from_le_bytes([buf[8], buf[9]]),
            height: u16::from_le_bytes([buf[10], buf[11]]),
            vitc: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
            ltc: u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]),
            fps_num: u16::from_le_bytes([buf[20], buf[21]]),
            fps_den: u16::from_le_bytes([buf[22], buf[23]]),
            signal: buf[24] != 0,
            audio_channels: buf[25],
            source_name: String::from_utf8_lossy(&name_field[..name_len]).into_owned(),
        })
    }
}

/// Planar 4:2:0 frame size: a full-resolution luma plane plus two
/// chroma planes subsampled by two in both directions (rounded up).
pub fn video_size(width: u16, height: u16) -> usize {
    let (w, h) = (width as usize, height as usize);
    w * h + 2 * w.div_ceil(2) * h.div_ceil(2)
}

fn truncate_name(name: &str) -> &str {
    let max = SOURCE_NAME_LEN - 1;
    if name.len() <= max {
        return name;
    }
    let mut end = max;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FrameHeader {
        FrameHeader {
            frame_seq: 0x0102_0304,
            packets_per_frame: 7,
            audio_size: 3840,
            width: 320,
            height: 180,
            vitc: 0x1122_3344,
            ltc: 0x5566_7788,
            fps_num: 30000,
            fps_den: 1001,
            signal: true,
            audio_channels: 2,
            source_name: "CAM 1".to_string(),
        }
    }

    #[test]
    fn encode_decode() {
        let header = sample();
        let buf = header.encode();
        assert_eq!(FrameHeader::decode(&buf).unwrap(), header);
    }

    #[test]
    fn fixed_layout() {
        let buf = sample().encode();
        assert_eq!(&buf[0..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&buf[4..6], &[7, 0]);
        assert_eq!(u16::from_le_bytes([buf[20], buf[21]]), 30000);
        assert_eq!(buf[24], 1);
        assert_eq!(buf[25], 2);
        assert_eq!(&buf[26..31], b"CAM 1");
        assert!(buf[31..].iter().all(|&b| b == 0));
    }

    #[test]
    fn long_name_truncated_and_terminated() {
        let mut header = sample();
        header.source_name = "x".repeat(200);
        let buf = header.encode();
        assert_eq!(buf[HEADER_SIZE - 1], 0);

        let decoded = FrameHeader::decode(&buf).unwrap();
        assert_eq!(decoded.source_name.len(), SOURCE_NAME_LEN - 1);
    }

    #[test]
    fn truncation_respects_char_boundary() {
        let mut header = sample();
        // 'é' is two bytes; 62 ASCII bytes leave one byte of room, not two.
        header.source_name = format!("{}é", "a".repeat(62));
        let decoded = FrameHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded.source_name, "a".repeat(62));
    }

    #[test]
    fn decode_short_buffer() {
        let err = FrameHeader::decode(&[0u8; HEADER_SIZE - 1]).unwrap_err();
        assert!(matches!(err, TransportError::InvalidDatagram { len } if len == HEADER_SIZE - 1));
    }

    #[test]
    fn decode_passes_through_nonsense() {
        let buf = [0u8; HEADER_SIZE];
        let header = FrameHeader::decode(&buf).unwrap();
        assert_eq!(header.packets_per_frame, 0);
        assert!(header.source_name.is_empty());
    }

    #[test]
    fn planar_420_size() {
        assert_eq!(video_size(4, 2), 8 + 2 * 2);
        assert_eq!(video_size(5, 3), 15 + 2 * 3 * 2);
        assert_eq!(video_size(0, 0), 0);
    }
}
