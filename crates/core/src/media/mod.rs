//! Frames and sender-side packetization.
//!
//! [`OutgoingFrame`] borrows the caller's audio and video and is split
//! into datagrams by [`FramePacketizer`]. On the receive side the consumer
//! API hands back owned [`Frame`]s (buffered mode) or fills caller buffers
//! and returns a [`SyncFrame`] (unbuffered mode).

pub mod frame;
pub mod packetizer;

pub use frame::{Frame, OutgoingFrame, SyncFrame};
pub use packetizer::{FramePacketizer, send_frame};
