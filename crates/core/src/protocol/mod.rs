//! Wire codec for the preview transport.
//!
//! Pure encode/decode with no I/O and no state. A logical frame (one
//! [`FrameHeader`], one audio block, one video block) travels as a run of
//! fixed-size datagrams:
//!
//! ```text
//! seq 0   HEADER  [sync|H slot|0    |FrameHeader|audio prefix ]
//! seq 1   AUDIO   [sync|A slot|1    |audio ...                ]
//!  ...
//! seq k   VIDEO   [sync|V slot|k    |video ...                ]
//!  ...
//! seq n-1 VIDEO   [sync|V slot|n-1  |video tail|unused        ]
//! ```
//!
//! Every datagram carries its own placement (slot + in-frame sequence),
//! so arrival order within a frame does not matter. There is no
//! acknowledgement or retransmission.
//!
//! | Item | Module |
//! |------|--------|
//! | Datagram prefix, classification | [`datagram`] |
//! | Frame metadata header | [`header`] |
//! | Datagram-to-offset mapping | [`layout`] |

pub mod datagram;
pub mod header;
pub mod layout;

pub use datagram::{
    DATAGRAM_SIZE, Datagram, DatagramKind, MAX_RING_SLOTS, PAYLOAD_SIZE, SYNC_BYTE, classify,
};
pub use header::{FrameHeader, HEADER_SIZE, SOURCE_NAME_LEN, video_size};
pub use layout::{FrameLayout, Placement};
