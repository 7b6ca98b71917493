//! Reassembly properties, fed straight into the frame ring.
//!
//! Datagrams come from the real packetizer; no sockets are involved, so
//! loss and reordering are fully under the test's control.

use std::sync::Arc;
use std::time::Duration;

use framecast::protocol::{HEADER_SIZE, PAYLOAD_SIZE, video_size};
use framecast::{DropReason, FrameConsumer, FramePacketizer, FrameRing, Ingested, OutgoingFrame, TransportError};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

const RING: usize = 8;
const WIDTH: u16 = 160;
const HEIGHT: u16 = 120;
const WAIT: Duration = Duration::from_millis(10);

struct TestFrame {
    frame_seq: u32,
    width: u16,
    height: u16,
    audio: Vec<u8>,
    video: Vec<u8>,
}

impl TestFrame {
    fn new(frame_seq: u32, width: u16, height: u16, audio_len: usize) -> Self {
        Self {
            frame_seq,
            width,
            height,
            audio: (0..audio_len).map(|i| (i % 13 + 1) as u8).collect(),
            video: (0..video_size(width, height))
                .map(|i| ((i + frame_seq as usize) % 251 + 1) as u8)
                .collect(),
        }
    }

    fn outgoing(&self) -> OutgoingFrame<'_> {
        OutgoingFrame::new(self.frame_seq, self.width, self.height, &self.video, &self.audio)
            .with_source_name("camera 1")
            .with_timecode(0x0102_0304, 0x0506_0708)
    }

    fn datagrams(&self, ring_slots: usize) -> Vec<Vec<u8>> {
        FramePacketizer::new(ring_slots)
            .unwrap()
            .packetize_to_vec(&self.outgoing())
            .unwrap()
    }
}

fn ring(slots: usize) -> Arc<FrameRing> {
    Arc::new(FrameRing::new(slots, video_size(320, 240)).unwrap())
}

#[test]
fn round_trip_in_order() {
    let ring = ring(RING);
    let mut consumer = FrameConsumer::new(ring.clone());
    let sent = TestFrame::new(3, WIDTH, HEIGHT, 3000);
    let expected_header = FramePacketizer::new(RING).unwrap().header_for(&sent.outgoing()).unwrap();

    let datagrams = sent.datagrams(RING);
    for (i, d) in datagrams.iter().enumerate() {
        let outcome = ring.ingest(d);
        if i + 1 == datagrams.len() {
            assert_eq!(outcome, Ingested::Completed { slot: 3, frame_seq: 3 });
        }
    }

    let frame = consumer.next_frame(WAIT).unwrap();
    assert!(frame.complete);
    assert_eq!(frame.header, expected_header);
    assert_eq!(frame.header.source_name, "camera 1");
    assert_eq!(frame.packets_received as usize, datagrams.len());
    assert_eq!(frame.audio, sent.audio);
    assert_eq!(frame.video, sent.video);
    assert!(frame.assembly_time().is_some());
}

#[test]
fn out_of_order_within_frame() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for frame_seq in 0..4u32 {
        let ring = ring(RING);
        let mut consumer = FrameConsumer::new(ring.clone());
        let sent = TestFrame::new(frame_seq, WIDTH, HEIGHT, 4000);

        let mut datagrams = sent.datagrams(RING);
        // The HEADER defines the slot and stays first.
        datagrams[1..].shuffle(&mut rng);
        for d in &datagrams {
            ring.ingest(d);
        }

        let frame = consumer.next_frame(WAIT).unwrap();
        assert!(frame.complete, "frame {frame_seq} incomplete");
        assert_eq!(frame.audio, sent.audio);
        assert_eq!(frame.video, sent.video);
    }
}

#[test]
fn lost_video_datagram_leaves_gap() {
    let ring = ring(RING);
    let mut consumer = FrameConsumer::new(ring.clone());
    let sent = TestFrame::new(1, WIDTH, HEIGHT, 3000);
    let datagrams = sent.datagrams(RING);

    // 3000 bytes of audio: header datagram + 2 AUDIO, video from seq 3.
    let lost = 5;
    for (i, d) in datagrams.iter().enumerate() {
        if i != lost {
            ring.ingest(d);
        }
    }

    let frame = consumer.next_frame(WAIT).unwrap();
    assert!(!frame.complete);
    assert_eq!(frame.packets_received as usize, datagrams.len() - 1);
    assert_eq!(frame.audio, sent.audio);

    let gap = (lost - 3) * PAYLOAD_SIZE..(lost - 2) * PAYLOAD_SIZE;
    assert!(frame.video[gap.clone()].iter().all(|&b| b == 0));
    assert_eq!(frame.video[..gap.start], sent.video[..gap.start]);
    assert_eq!(frame.video[gap.end..], sent.video[gap.end..]);
}

#[test]
fn lost_audio_datagram_leaves_gap() {
    let ring = ring(RING);
    let mut consumer = FrameConsumer::new(ring.clone());
    let sent = TestFrame::new(2, WIDTH, HEIGHT, 3000);
    let datagrams = sent.datagrams(RING);

    // Second AUDIO datagram carries the audio tail after prefix + one payload.
    let tail = (PAYLOAD_SIZE - HEADER_SIZE) + PAYLOAD_SIZE;
    for (i, d) in datagrams.iter().enumerate() {
        if i != 2 {
            ring.ingest(d);
        }
    }

    let frame = consumer.next_frame(WAIT).unwrap();
    assert!(!frame.complete);
    assert_eq!(frame.audio[..tail], sent.audio[..tail]);
    assert!(frame.audio[tail..].iter().all(|&b| b == 0));
    assert_eq!(frame.video, sent.video);
}

#[test]
fn no_redelivery() {
    let ring = ring(RING);
    let mut consumer = FrameConsumer::new(ring.clone());
    for d in TestFrame::new(0, WIDTH, HEIGHT, 100).datagrams(RING) {
        ring.ingest(&d);
    }

    assert_eq!(consumer.next_frame(WAIT).unwrap().header.frame_seq, 0);
    let err = consumer.next_frame(WAIT).unwrap_err();
    assert!(matches!(err, TransportError::Timeout { packets: 0 }));
}

/// Frames 1 and 5 share slot 1 of a 4-slot ring; the newer one is much smaller.
fn aliased_pair() -> (Vec<Vec<u8>>, TestFrame, TestFrame) {
    let older_frame = TestFrame::new(1, WIDTH, HEIGHT, 0);
    let newer_frame = TestFrame::new(5, 32, 32, 0);
    (older_frame.datagrams(4), older_frame, newer_frame)
}

/// Slot 0 is empty, so the first call resyncs onto slot 1.
fn deliver_from_slot_1(consumer: &mut FrameConsumer) -> framecast::Frame {
    assert!(consumer.next_frame(WAIT).is_err());
    consumer.next_frame(WAIT).unwrap()
}

#[test]
fn aliased_frames_keep_declared_regions() {
    let ring = ring(4);
    let mut consumer = FrameConsumer::new(ring.clone());
    let (older, older_frame, newer_frame) = aliased_pair();
    let newer = newer_frame.datagrams(4);
    assert_eq!(newer.len(), 3);

    ring.ingest(&older[0]);
    for d in &newer {
        ring.ingest(d);
    }
    assert!(ring.stats(1).unwrap().complete);

    // The older frame's header and datagrams straggle in afterwards.
    assert_eq!(ring.ingest(&older[0]), Ingested::Dropped(DropReason::Stale));
    for d in &older[1..newer.len()] {
        assert_eq!(ring.ingest(d), Ingested::Rewritten { slot: 1 });
    }
    for d in &older[newer.len()..] {
        assert_eq!(ring.ingest(d), Ingested::Dropped(DropReason::OutOfBounds));
    }

    let frame = deliver_from_slot_1(&mut consumer);
    assert_eq!(frame.header.frame_seq, 5);
    assert!(frame.complete);
    assert_eq!(frame.packets_received, 3);
    // Same seqs, so the stragglers' bytes replaced the newer frame's video.
    assert_eq!(frame.video, older_frame.video[..newer_frame.video.len()]);
}

#[test]
fn newer_payload_overwrites_earlier_straggler() {
    let ring = ring(4);
    let mut consumer = FrameConsumer::new(ring.clone());
    let (older, _, newer_frame) = aliased_pair();
    let newer = newer_frame.datagrams(4);

    assert_eq!(ring.ingest(&older[0]), Ingested::Started { slot: 1, frame_seq: 1 });
    assert_eq!(ring.ingest(&newer[0]), Ingested::Started { slot: 1, frame_seq: 5 });
    // Lands in frame 5 before frame 5's own seq 1 arrives.
    assert_eq!(ring.ingest(&older[1]), Ingested::Accepted { slot: 1 });

    assert_eq!(ring.ingest(&newer[0]), Ingested::Dropped(DropReason::Duplicate));
    assert_eq!(ring.ingest(&newer[1]), Ingested::Rewritten { slot: 1 });
    assert_eq!(ring.ingest(&newer[2]), Ingested::Completed { slot: 1, frame_seq: 5 });

    let frame = deliver_from_slot_1(&mut consumer);
    assert_eq!(frame.header.frame_seq, 5);
    assert!(frame.complete);
    assert_eq!(frame.packets_received, 3);
    assert_eq!(frame.video, newer_frame.video);
}

#[test]
fn partial_delivery_threshold() {
    let sent = TestFrame::new(0, WIDTH, HEIGHT, 0);
    let datagrams = sent.datagrams(RING);

    let ring_a = ring(RING);
    let mut consumer = FrameConsumer::new(ring_a.clone());
    for d in &datagrams[..5] {
        ring_a.ingest(d);
    }
    let frame = consumer.next_frame(WAIT).unwrap();
    assert!(!frame.complete);
    assert_eq!(frame.packets_received, 5);
    assert_eq!(frame.video[..4 * PAYLOAD_SIZE], sent.video[..4 * PAYLOAD_SIZE]);

    let ring_b = ring(RING);
    let mut consumer = FrameConsumer::new(ring_b.clone());
    for d in &datagrams[..4] {
        ring_b.ingest(d);
    }
    let err = consumer.next_frame(WAIT).unwrap_err();
    assert!(matches!(err, TransportError::Timeout { packets: 4 }));
}
