//! UDP transport (unicast and multicast)

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, ErrorKind};
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::time::Duration;
use tracing::{info, trace};

use crate::error::NetworkError;
use crate::protocol::{Chunk, HEADER_SIZE};
use crate::transport::{interface_index, ChunkSource, Interface, SourceStats};

/// Receive buffer size. Standard chunks are 1157 bytes; anything up to a
/// full UDP datagram is accepted.
const RECV_BUFFER_SIZE: usize = 65_536;

/// Socket receive buffer requested from the OS
const SOCKET_RECV_BUFFER: usize = 1 << 20;

/// How the socket is bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UdpMode {
    /// Bind to `interface` only
    Unicast,
    /// Bind to any address and join `group` on `interface`
    Multicast { group: Ipv4Addr },
}

/// Chunk source reading datagrams from a UDP socket
pub struct UdpSource {
    socket: UdpSocket,
    buf: Vec<u8>,
    stats: SourceStats,
}

#[cfg(target_os = "linux")]
fn bind_to_device(socket: &Socket, name: &str) -> Result<(), NetworkError> {
    socket
        .bind_device(Some(name.as_bytes()))
        .map_err(|e| NetworkError::BindFailed(format!("{}: {}", name, e)))
}

#[cfg(target_os = "linux")]
fn join_on_index(socket: &Socket, group: &Ipv4Addr, index: u32) -> io::Result<()> {
    socket.join_multicast_v4_n(group, &socket2::InterfaceIndexOrAddress::Index(index))
}

#[cfg(not(target_os = "linux"))]
fn join_on_index(_socket: &Socket, _group: &Ipv4Addr, _index: u32) -> io::Result<()> {
    Err(io::Error::new(ErrorKind::Unsupported, "joining by interface index"))
}

#[cfg(not(target_os = "linux"))]
fn bind_to_device(_socket: &Socket, name: &str) -> Result<(), NetworkError> {
    Err(NetworkError::UnknownInterface(format!(
        "{} (binding by name is supported on Linux only)",
        name
    )))
}

impl UdpSource {
    /// Bind a socket for `mode` on `port`.
    ///
    /// `interface` is an address or a name. `idle_timeout` bounds each
    /// receive so the caller can poll for shutdown.
    pub fn bind(
        mode: UdpMode,
        interface: &Interface,
        port: u16,
        idle_timeout: Duration,
    ) -> Result<Self, NetworkError> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
        socket
            .set_reuse_address(true)
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
        // Best effort; the OS may clamp it
        let _ = socket.set_recv_buffer_size(SOCKET_RECV_BUFFER);

        let bind_ip = match mode {
            UdpMode::Unicast => interface.address(),
            UdpMode::Multicast { .. } => Ipv4Addr::UNSPECIFIED,
        };
        if let (UdpMode::Unicast, Interface::Name(name)) = (mode, interface) {
            bind_to_device(&socket, name)?;
        }
        let addr = SocketAddrV4::new(bind_ip, port);
        socket
            .bind(&SockAddr::from(addr))
            .map_err(|e| NetworkError::BindFailed(format!("{}: {}", addr, e)))?;

        if let UdpMode::Multicast { group } = mode {
            let joined = match interface {
                Interface::Name(name) => join_on_index(&socket, &group, interface_index(name)?),
                other => socket.join_multicast_v4(&group, &other.address()),
            };
            joined.map_err(|e| NetworkError::JoinFailed(format!("{} on {}: {}", group, interface, e)))?;
            info!("Joined multicast group {} on {}, port {}", group, interface, port);
        } else {
            info!("Listening for unicast on {} ({})", addr, interface);
        }

        let socket: UdpSocket = socket.into();
        Self::from_socket(socket, idle_timeout)
    }

    /// Wrap an already bound socket
    pub fn from_socket(socket: UdpSocket, idle_timeout: Duration) -> Result<Self, NetworkError> {
        socket
            .set_read_timeout(Some(idle_timeout.max(Duration::from_millis(1))))
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
        Ok(Self {
            socket,
            buf: vec![0u8; RECV_BUFFER_SIZE],
            stats: SourceStats::default(),
        })
    }

    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.socket.local_addr().ok()
    }
}

impl ChunkSource for UdpSource {
    fn next_chunk(&mut self) -> Result<Option<Chunk<'_>>, NetworkError> {
        let len = loop {
            match self.socket.recv_from(&mut self.buf) {
                Ok((n, _)) if n >= HEADER_SIZE => break n,
                Ok((n, from)) => {
                    trace!("Dropping {} byte datagram from {}", n, from);
                    self.stats.record_invalid();
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(None)
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => return Ok(None),
                Err(e) => return Err(NetworkError::ReceiveFailed(e.to_string())),
            }
        };

        self.stats.record_chunk(len);
        Chunk::parse(&self.buf[..len]).map(Some)
    }

    fn stats(&self) -> SourceStats {
        self.stats
    }
}
