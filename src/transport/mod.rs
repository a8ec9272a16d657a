//! Chunk transports
//!
//! Every transport yields [`Chunk`]s: a format header plus a payload borrowed
//! from the transport's own buffer until the next call.

pub mod capture;
pub mod shmem;
pub mod udp;

#[cfg(target_os = "linux")]
pub use capture::LiveCapture;
pub use capture::{CaptureSource, FrameCapture, PcapFileReader};
pub use shmem::{SharedRegion, ShmemSource};
pub use udp::UdpSource;

use std::fmt;
use std::net::Ipv4Addr;

use crate::error::NetworkError;
use crate::protocol::Chunk;

/// Local interface a transport listens on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interface {
    Any,
    Address(Ipv4Addr),
    /// Kernel interface name such as `eth0`
    Name(String),
}

impl Interface {
    /// An IPv4 address, otherwise an interface name. Empty or unset means any.
    pub fn parse(spec: Option<&str>) -> Self {
        match spec.map(str::trim) {
            None | Some("") => Interface::Any,
            Some(spec) => match spec.parse::<Ipv4Addr>() {
                Ok(addr) if addr.is_unspecified() => Interface::Any,
                Ok(addr) => Interface::Address(addr),
                Err(_) => Interface::Name(spec.to_string()),
            },
        }
    }

    /// Address to hand to IPv4 socket options; names resolve elsewhere
    pub fn address(&self) -> Ipv4Addr {
        match self {
            Interface::Address(addr) => *addr,
            Interface::Any | Interface::Name(_) => Ipv4Addr::UNSPECIFIED,
        }
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interface::Any => f.write_str("any interface"),
            Interface::Address(addr) => write!(f, "{}", addr),
            Interface::Name(name) => f.write_str(name),
        }
    }
}

/// Kernel index of the interface called `name`
#[cfg(target_os = "linux")]
pub fn interface_index(name: &str) -> Result<u32, NetworkError> {
    if name.is_empty() || name.len() > 15 || name.contains('/') || name.starts_with('.') {
        return Err(NetworkError::UnknownInterface(name.to_string()));
    }
    let path = std::path::Path::new("/sys/class/net").join(name).join("ifindex");
    std::fs::read_to_string(path)
        .ok()
        .and_then(|text| text.trim().parse().ok())
        .ok_or_else(|| NetworkError::UnknownInterface(name.to_string()))
}

#[cfg(not(target_os = "linux"))]
pub fn interface_index(name: &str) -> Result<u32, NetworkError> {
    Err(NetworkError::UnknownInterface(format!(
        "{} (interface names are resolved on Linux only)",
        name
    )))
}

/// Source of audio chunks
pub trait ChunkSource {
    /// Block until a chunk is available.
    ///
    /// Returns `Ok(None)` when nothing arrived within the transport's idle
    /// wait so the caller can check for shutdown. Malformed input is dropped
    /// internally and never returned as an error.
    fn next_chunk(&mut self) -> Result<Option<Chunk<'_>>, NetworkError>;

    /// Counters for this transport
    fn stats(&self) -> SourceStats;
}

/// Transport statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceStats {
    pub chunks_received: u64,
    pub bytes_received: u64,
    pub invalid_packets: u64,
}

impl SourceStats {
    pub(crate) fn record_chunk(&mut self, bytes: usize) {
        self.chunks_received += 1;
        self.bytes_received += bytes as u64;
    }

    pub(crate) fn record_invalid(&mut self) {
        self.invalid_packets += 1;
    }
}

impl<S: ChunkSource + ?Sized> ChunkSource for Box<S> {
    fn next_chunk(&mut self) -> Result<Option<Chunk<'_>>, NetworkError> {
        (**self).next_chunk()
    }

    fn stats(&self) -> SourceStats {
        (**self).stats()
    }
}
