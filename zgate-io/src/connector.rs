//! Outbound channel for control packets
//!
//! The gate writes every control packet through a single [`Connector`].
//! Media never goes through it; the media pipeline owns its own sockets.

use bytes::Bytes;
use crossbeam::channel::{self, Receiver, Sender};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, ErrorKind};
use std::mem::MaybeUninit;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;
use thiserror::Error;

/// Connector errors
#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid socket address")]
    InvalidAddress,

    #[error("Connector is closed")]
    Closed,
}

impl ConnectorError {
    /// Whether the operation only timed out or would block
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ConnectorError::Io(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
        )
    }
}

/// Destination for outbound control packets
///
/// Implementations must accept concurrent writers; each call writes one
/// whole datagram.
pub trait Connector: Send + Sync {
    /// Write one packet; returns the number of bytes written
    fn write(&self, packet: &[u8]) -> Result<usize, ConnectorError>;
}

/// UDP connector bound to a local address and connected to one peer
pub struct UdpConnector {
    inner: Socket,
}

impl UdpConnector {
    /// Bind a blocking UDP socket to `addr`
    pub fn bind(addr: SocketAddr) -> Result<Self, ConnectorError> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;

        Ok(UdpConnector { inner: socket })
    }

    /// Fix the peer all writes go to
    pub fn connect(&self, peer: SocketAddr) -> Result<(), ConnectorError> {
        self.inner.connect(&peer.into())?;
        Ok(())
    }

    /// Bound the time [`recv`](Self::recv) blocks
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), ConnectorError> {
        self.inner.set_read_timeout(timeout)?;
        Ok(())
    }

    /// Get the local address this socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, ConnectorError> {
        self.inner
            .local_addr()?
            .as_socket()
            .ok_or(ConnectorError::InvalidAddress)
    }

    /// Get the connected peer address
    pub fn peer_addr(&self) -> Result<SocketAddr, ConnectorError> {
        self.inner
            .peer_addr()?
            .as_socket()
            .ok_or(ConnectorError::InvalidAddress)
    }

    /// Receive one datagram from the connected peer
    pub fn recv(&self, buf: &mut [u8]) -> Result<usize, ConnectorError> {
        // SAFETY: u8 and MaybeUninit<u8> share layout, and recv only writes
        // initialized bytes into the prefix it reports.
        let uninit = unsafe {
            std::slice::from_raw_parts_mut(buf.as_mut_ptr() as *mut MaybeUninit<u8>, buf.len())
        };
        Ok(self.inner.recv(uninit)?)
    }

    /// Clone the underlying socket, e.g. for a dedicated receive thread
    pub fn try_clone(&self) -> Result<Self, ConnectorError> {
        Ok(UdpConnector {
            inner: self.inner.try_clone()?,
        })
    }

    /// Convert to a standard UDP socket
    pub fn into_udp_socket(self) -> UdpSocket {
        self.inner.into()
    }
}

impl Connector for UdpConnector {
    fn write(&self, packet: &[u8]) -> Result<usize, ConnectorError> {
        Ok(self.inner.send(packet)?)
    }
}

/// In-process connector delivering every written packet to a channel
///
/// Used to wire two gates back to back without sockets.
pub struct ChannelConnector {
    tx: Sender<Bytes>,
}

impl ChannelConnector {
    /// Create a connector and the receiving end of its channel
    pub fn new() -> (Self, Receiver<Bytes>) {
        let (tx, rx) = channel::unbounded();
        (ChannelConnector { tx }, rx)
    }
}

impl Connector for ChannelConnector {
    fn write(&self, packet: &[u8]) -> Result<usize, ConnectorError> {
        self.tx
            .send(Bytes::copy_from_slice(packet))
            .map_err(|_| ConnectorError::Closed)?;
        Ok(packet.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> UdpConnector {
        UdpConnector::bind("127.0.0.1:0".parse().unwrap()).unwrap()
    }

    #[test]
    fn test_bind_assigns_port() {
        let conn = loopback();
        assert!(conn.local_addr().unwrap().port() > 0);
    }

    #[test]
    fn test_write_recv() {
        let a = loopback();
        let b = loopback();
        a.connect(b.local_addr().unwrap()).unwrap();
        b.connect(a.local_addr().unwrap()).unwrap();
        b.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        let data = b"control packet";
        assert_eq!(a.write(data).unwrap(), data.len());

        let mut buf = [0u8; 1500];
        let n = b.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], data);
        assert_eq!(b.peer_addr().unwrap(), a.local_addr().unwrap());
    }

    #[test]
    fn test_recv_timeout() {
        let conn = loopback();
        conn.set_read_timeout(Some(Duration::from_millis(20))).unwrap();

        let mut buf = [0u8; 64];
        let err = conn.recv(&mut buf).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_channel_connector() {
        let (conn, rx) = ChannelConnector::new();
        conn.write(&[1, 2, 3]).unwrap();
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(&[1, 2, 3]));

        drop(rx);
        assert!(matches!(conn.write(&[4]), Err(ConnectorError::Closed)));
    }
}
