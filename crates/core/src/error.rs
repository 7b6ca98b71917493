//! Error types for the preview transport library.

use std::fmt;

/// Errors that can occur in the preview transport library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Socket**: [`Io`](Self::Io), [`InvalidAddress`](Self::InvalidAddress): bind, join,
///   send and receive failures. Fatal for the endpoint that raised them.
/// - **Wire**: [`InvalidDatagram`](Self::InvalidDatagram),
///   [`BoundsViolation`](Self::BoundsViolation): per-datagram problems. The ingestion
///   path logs and drops these; they never stop a frame from assembling.
/// - **Delivery**: [`Timeout`](Self::Timeout): no complete frame before the deadline.
/// - **Sender**: [`FrameTooLarge`](Self::FrameTooLarge),
///   [`FrameSizeMismatch`](Self::FrameSizeMismatch).
/// - **Lifecycle**: [`AlreadyRunning`](Self::AlreadyRunning),
///   [`NotStarted`](Self::NotStarted), [`IngestFailed`](Self::IngestFailed).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The endpoint address is neither an IPv4 nor an IPv6 literal.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Bad sync byte, bad flags, or a datagram that is not exactly the fixed size.
    #[error("invalid datagram ({len} bytes)")]
    InvalidDatagram { len: usize },

    /// A computed write offset falls outside the declared region of the frame.
    #[error("{region} write at offset {offset} outside declared size {limit}")]
    BoundsViolation {
        region: Region,
        offset: usize,
        limit: usize,
    },

    /// No complete frame arrived before the deadline.
    ///
    /// `packets` is the number of datagrams observed for the frame at the
    /// consumer's ring position, so the caller can judge how close it was.
    #[error("timed out waiting for frame ({packets} packets received)")]
    Timeout { packets: u16 },

    /// The frame needs more datagrams, audio bytes or slot space than the wire format allows.
    #[error("frame too large: {0}")]
    FrameTooLarge(String),

    /// A payload buffer does not match the size declared by the frame header.
    #[error("{region} buffer is {actual} bytes, header declares {declared}")]
    FrameSizeMismatch {
        region: Region,
        actual: usize,
        declared: usize,
    },

    /// Rejected configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// [`Receiver::start`](crate::Receiver::start) was called while the ingestion loop runs,
    /// or a synchronous read was attempted while it runs.
    #[error("ingestion loop already running")]
    AlreadyRunning,

    /// [`Receiver::stop`](crate::Receiver::stop) was called without a running ingestion loop.
    #[error("ingestion loop not started")]
    NotStarted,

    /// The ingestion thread terminated on a fatal socket error or panicked.
    #[error("ingestion loop failed: {0}")]
    IngestFailed(String),
}

/// Payload region of a logical frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Header,
    Audio,
    Video,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Header => write!(f, "header"),
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// Convenience alias for `Result<T, TransportError>`.
pub type Result<T> = std::result::Result<T, TransportError>;
