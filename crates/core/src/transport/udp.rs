use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use parking_lot::Mutex;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::error::{Result, TransportError};
use crate::protocol::DATAGRAM_SIZE;

/// Receive buffers must be one byte larger than a datagram so that an
/// oversized datagram shows up as such instead of being silently cut.
pub const RECV_BUFFER_LEN: usize = DATAGRAM_SIZE + 1;

/// Shortest read timeout handed to the socket; zero would mean "block forever".
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// A UDP socket set up for sending or receiving fixed-size datagrams.
///
/// The address family follows the address literal (IPv4 or IPv6). Socket
/// buffer enlargement is best effort: a kernel cap only produces a warning.
pub struct Endpoint {
    socket: UdpSocket,
    group: Option<IpAddr>,
    peer: Option<SocketAddr>,
    read_timeout: Mutex<Option<Duration>>,
}

impl Endpoint {
    /// Open a receiving endpoint on `address:port`.
    ///
    /// For a multicast `address` the socket binds the unspecified address of
    /// the matching family and joins the group on the default interface.
    /// Any other address is bound directly. Port 0 picks an ephemeral port,
    /// see [`local_addr`](Self::local_addr).
    pub fn open_multicast_receiver(address: &str, port: u16, recv_buffer_size: usize) -> Result<Self> {
        let ip = parse_ip(address)?;
        let socket = new_socket(ip)?;
        request_buffer(&socket, BufferDirection::Receive, recv_buffer_size);

        let bind_ip = if ip.is_multicast() { unspecified(ip) } else { ip };
        socket.bind(&SocketAddr::new(bind_ip, port).into())?;

        let socket: UdpSocket = socket.into();
        let group = match ip {
            IpAddr::V4(group) if group.is_multicast() => {
                socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
                Some(ip)
            }
            IpAddr::V6(group) if group.is_multicast() => {
                socket.join_multicast_v6(&group, 0)?;
                Some(ip)
            }
            _ => None,
        };

        tracing::info!(
            addr = %socket.local_addr()?,
            group = ?group,
            "receiver endpoint open"
        );

        Ok(Self {
            socket,
            group,
            peer: None,
            read_timeout: Mutex::new(None),
        })
    }

    /// Open a sending endpoint connected to `address:port`.
    ///
    /// Multicast destinations get `multicast_hops` as TTL/hop limit and
    /// loopback enabled so that monitors on the sending host see the stream.
    pub fn open_streaming_sender(
        address: &str,
        port: u16,
        send_buffer_size: usize,
        multicast_hops: u32,
    ) -> Result<Self> {
        let ip = parse_ip(address)?;
        let dest = SocketAddr::new(ip, port);
        let socket = new_socket(ip)?;
        request_buffer(&socket, BufferDirection::Send, send_buffer_size);

        match ip {
            IpAddr::V4(group) if group.is_multicast() => {
                socket.set_multicast_ttl_v4(multicast_hops)?;
                socket.set_multicast_loop_v4(true)?;
            }
            IpAddr::V6(group) if group.is_multicast() => {
                socket.set_multicast_hops_v6(multicast_hops)?;
                socket.set_multicast_loop_v6(true)?;
            }
            _ => {}
        }

        socket.connect(&SockAddr::from(dest))?;
        let socket: UdpSocket = socket.into();

        tracing::info!(
            local = %socket.local_addr()?,
            dest = %dest,
            hops = multicast_hops,
            "sender endpoint open"
        );

        Ok(Self {
            socket,
            group: ip.is_multicast().then_some(ip),
            peer: Some(dest),
            read_timeout: Mutex::new(None),
        })
    }

    /// Receive one datagram into `buf`.
    ///
    /// Waits at most `timeout` (`None` blocks indefinitely). Returns
    /// `Ok(None)` when the wait expires. UDP delivers whole messages, so a
    /// returned length is never a partial datagram; a length other than
    /// [`DATAGRAM_SIZE`] means the sender is not speaking this protocol.
    pub fn recv_datagram(&self, buf: &mut [u8], timeout: Option<Duration>) -> Result<Option<usize>> {
        self.set_read_timeout(timeout)?;
        match self.socket.recv_from(buf) {
            Ok((len, from)) => {
                tracing::trace!(len, %from, "datagram received");
                Ok(Some(len))
            }
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock
                        | std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Send exactly one fixed-size datagram to the connected destination.
    pub fn send_datagram(&self, datagram: &[u8]) -> Result<usize> {
        if datagram.len() != DATAGRAM_SIZE {
            return Err(TransportError::InvalidDatagram {
                len: datagram.len(),
            });
        }
        Ok(self.socket.send(datagram)?)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Destination of a sending endpoint.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Multicast group joined (receiver) or targeted (sender), if any.
    pub fn group(&self) -> Option<IpAddr> {
        self.group
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        let timeout = timeout.map(|t| t.max(MIN_READ_TIMEOUT));
        let mut current = self.read_timeout.lock();
        if *current != timeout {
            self.socket.set_read_timeout(timeout)?;
            *current = timeout;
        }
        Ok(())
    }
}

/// Parse an IPv4 or IPv6 literal; the family decides the socket domain.
pub fn parse_ip(address: &str) -> Result<IpAddr> {
    address
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .map_err(|_| TransportError::InvalidAddress(address.to_string()))
}

fn new_socket(ip: IpAddr) -> Result<Socket> {
    let domain = if ip.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    if ip.is_ipv6() {
        socket.set_only_v6(true)?;
    }
    Ok(socket)
}

fn unspecified(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    }
}

#[derive(Debug, Clone, Copy)]
enum BufferDirection {
    Send,
    Receive,
}

fn request_buffer(socket: &Socket, direction: BufferDirection, size: usize) {
    let (set, actual) = match direction {
        BufferDirection::Send => (socket.set_send_buffer_size(size), socket.send_buffer_size()),
        BufferDirection::Receive => (socket.set_recv_buffer_size(size), socket.recv_buffer_size()),
    };
    if let Err(e) = set {
        tracing::warn!(?direction, requested = size, error = %e, "could not enlarge socket buffer");
        return;
    }
    if let Ok(actual) = actual
        && actual < size
    {
        tracing::warn!(?direction, requested = size, actual, "socket buffer smaller than requested");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_v4_and_v6() {
        assert!(parse_ip("239.1.2.3").unwrap().is_multicast());
        assert!(parse_ip("ff02::1").unwrap().is_ipv6());
        assert!(parse_ip("[::1]").unwrap().is_loopback());
        assert!(matches!(
            parse_ip("camera.local"),
            Err(TransportError::InvalidAddress(_))
        ));
    }

    #[test]
    fn loopback_send_receive() {
        let rx = Endpoint::open_multicast_receiver("127.0.0.1", 0, 1 << 20).unwrap();
        assert!(rx.group().is_none());
        let port = rx.local_addr().unwrap().port();
        let tx = Endpoint::open_streaming_sender("127.0.0.1", port, 1 << 20, 1).unwrap();

        let datagram = [0x5Au8; DATAGRAM_SIZE];
        assert_eq!(tx.send_datagram(&datagram).unwrap(), DATAGRAM_SIZE);

        let mut buf = [0u8; RECV_BUFFER_LEN];
        let len = rx
            .recv_datagram(&mut buf, Some(Duration::from_secs(2)))
            .unwrap()
            .expect("datagram");
        assert_eq!(len, DATAGRAM_SIZE);
        assert_eq!(&buf[..len], &datagram[..]);
    }

    #[test]
    fn receive_times_out() {
        let rx = Endpoint::open_multicast_receiver("127.0.0.1", 0, 1 << 16).unwrap();
        let mut buf = [0u8; RECV_BUFFER_LEN];
        let got = rx
            .recv_datagram(&mut buf, Some(Duration::from_millis(20)))
            .unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn send_rejects_wrong_size() {
        let rx = Endpoint::open_multicast_receiver("127.0.0.1", 0, 1 << 16).unwrap();
        let port = rx.local_addr().unwrap().port();
        let tx = Endpoint::open_streaming_sender("127.0.0.1", port, 1 << 16, 1).unwrap();
        assert!(matches!(
            tx.send_datagram(&[0u8; 100]),
            Err(TransportError::InvalidDatagram { len: 100 })
        ));
    }

    #[test]
    fn oversized_datagram_detectable() {
        let rx = Endpoint::open_multicast_receiver("127.0.0.1", 0, 1 << 16).unwrap();
        let addr = rx.local_addr().unwrap();
        let raw = UdpSocket::bind("127.0.0.1:0").unwrap();
        raw.send_to(&[0u8; DATAGRAM_SIZE + 20], addr).unwrap();

        let mut buf = [0u8; RECV_BUFFER_LEN];
        let len = rx
            .recv_datagram(&mut buf, Some(Duration::from_secs(2)))
            .unwrap()
            .expect("datagram");
        assert!(len > DATAGRAM_SIZE);
    }
}
