use std::time::{Duration, Instant};

use crate::protocol::FrameHeader;

/// A logical frame handed to the caller by the consumer API.
///
/// `complete` is false for a best-effort partial delivery; regions whose
/// datagrams never arrived hold whatever the ring slot contained before.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub header: FrameHeader,
    pub audio: Vec<u8>,
    pub video: Vec<u8>,
    pub packets_received: u16,
    pub complete: bool,
    /// Arrival of the frame's HEADER datagram.
    pub first_arrival: Option<Instant>,
    /// Arrival of the datagram that completed the frame.
    pub completed_at: Option<Instant>,
}

impl Frame {
    /// Time between the first and the completing datagram, if complete.
    pub fn assembly_time(&self) -> Option<Duration> {
        match (self.first_arrival, self.completed_at) {
            (Some(first), Some(done)) => Some(done.saturating_duration_since(first)),
            _ => None,
        }
    }
}

/// Result of an unbuffered read into caller-supplied audio/video buffers.
#[derive(Debug, Clone)]
pub struct SyncFrame {
    pub header: FrameHeader,
    pub packets_received: u16,
    pub complete: bool,
}

/// A frame to be packetized and sent.
///
/// `video` must be planar 4:2:0 at `width` x `height`; scaling or pixel
/// conversion happens before this point.
#[derive(Debug, Clone, Copy)]
pub struct OutgoingFrame<'a> {
    pub frame_seq: u32,
    pub width: u16,
    pub height: u16,
    pub audio_channels: u8,
    pub fps_num: u16,
    pub fps_den: u16,
    pub vitc: u32,
    pub ltc: u32,
    pub signal: bool,
    pub source_name: &'a str,
    pub audio: &'a [u8],
    pub video: &'a [u8],
}

impl<'a> OutgoingFrame<'a> {
    /// Stereo, 25 fps, signal present, unnamed, zero timecodes.
    pub fn new(frame_seq: u32, width: u16, height: u16, video: &'a [u8], audio: &'a [u8]) -> Self {
        Self {
            frame_seq,
            width,
            height,
            audio_channels: 2,
            fps_num: 25,
            fps_den: 1,
            vitc: 0,
            ltc: 0,
            signal: true,
            source_name: "",
            audio,
            video,
        }
    }

    pub fn with_source_name(mut self, name: &'a str) -> Self {
        self.source_name = name;
        self
    }

    pub fn with_timecode(mut self, vitc: u32, ltc: u32) -> Self {
        self.vitc = vitc;
        self.ltc = ltc;
        self
    }

    pub fn with_framerate(mut self, num: u16, den: u16) -> Self {
        self.fps_num = num;
        self.fps_den = den;
        self
    }

    pub fn with_audio_channels(mut self, channels: u8) -> Self {
        self.audio_channels = channels;
        self
    }

    pub fn with_signal(mut self, signal: bool) -> Self {
        self.signal = signal;
        self
    }
}
