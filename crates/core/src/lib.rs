pub mod config;
pub mod consumer;
pub mod error;
pub mod ingest;
pub mod media;
pub mod protocol;
pub mod receiver;
pub mod ring;
pub mod sender;
pub mod transport;

pub use config::{ReceiverConfig, SenderConfig};
pub use consumer::FrameConsumer;
pub use error::{Region, Result, TransportError};
pub use ingest::{IngestLoop, IngestStats};
pub use media::{Frame, FramePacketizer, OutgoingFrame, SyncFrame};
pub use protocol::FrameHeader;
pub use receiver::Receiver;
pub use ring::{DropReason, FrameRing, Ingested};
pub use sender::Sender;
pub use transport::Endpoint;
