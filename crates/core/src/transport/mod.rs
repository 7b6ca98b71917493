//! Network transport for preview datagrams.
//!
//! A single UDP socket per direction:
//!
//! - **Receiver**: bound to the stream port, joined to the multicast group
//!   when the address is a multicast address, with an enlarged receive
//!   buffer so bursts of datagrams for one frame survive scheduling jitter.
//! - **Sender**: connected to the destination so plain `send` can be used,
//!   with a hop limit for multicast traffic.
//!
//! Both directions move exactly one fixed-size datagram per call. Socket
//! errors are fatal for the endpoint and surface as
//! [`TransportError::Io`](crate::TransportError::Io).

pub mod udp;

pub use udp::{Endpoint, RECV_BUFFER_LEN, parse_ip};
