//! Captured-packet transport
//!
//! Extracts chunks from raw Ethernet frames, for setups where the stream is
//! sniffed off an interface (macvtap, bridges) rather than received on a
//! socket. Frames come from any [`FrameCapture`]: [`LiveCapture`] sniffs an
//! interface (Linux packet sockets), [`PcapFileReader`] replays a classic
//! `.pcap` file.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::{info, trace};

use crate::error::NetworkError;
use crate::protocol::{Chunk, HEADER_SIZE};
use crate::transport::{ChunkSource, SourceStats};

const ETHERNET_HEADER: usize = 14;
const ETHERTYPE_IPV4: u16 = 0x0800;
const IP_PROTO_UDP: u8 = 17;
const UDP_HEADER: usize = 8;

/// Producer of raw link-layer frames
pub trait FrameCapture {
    /// Next captured frame, `None` when the capture is idle or exhausted
    fn next_frame(&mut self) -> Result<Option<&[u8]>, NetworkError>;
}

/// Locate the UDP payload of an Ethernet/IPv4 frame sent to or from `port`
pub fn udp_payload(frame: &[u8], port: u16) -> Option<&[u8]> {
    if frame.len() < ETHERNET_HEADER + 20 {
        return None;
    }
    let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
    if ethertype != ETHERTYPE_IPV4 {
        return None;
    }

    let ip = &frame[ETHERNET_HEADER..];
    let ip_header_len = (ip[0] & 0x0f) as usize * 4;
    if ip[0] >> 4 != 4 || ip_header_len < 20 || ip[9] != IP_PROTO_UDP {
        return None;
    }
    // Fragments cannot be reassembled here
    let frag = u16::from_be_bytes([ip[6], ip[7]]);
    if frag & 0x3fff != 0 {
        return None;
    }

    let ip_len = u16::from_be_bytes([ip[2], ip[3]]) as usize;
    let payload_start = ip_header_len + UDP_HEADER;
    if ip_len < payload_start || ip_len > ip.len() {
        return None;
    }

    let udp = &ip[ip_header_len..];
    let src_port = u16::from_be_bytes([udp[0], udp[1]]);
    let dst_port = u16::from_be_bytes([udp[2], udp[3]]);
    if src_port != port && dst_port != port {
        return None;
    }

    Some(&ip[payload_start..ip_len])
}

/// Chunk source demultiplexing captured frames
pub struct CaptureSource<C: FrameCapture> {
    capture: C,
    port: u16,
    payload: Vec<u8>,
    stats: SourceStats,
}

impl<C: FrameCapture> CaptureSource<C> {
    /// Accept UDP payloads with `port` as source or destination
    pub fn new(capture: C, port: u16) -> Self {
        Self {
            capture,
            port,
            payload: Vec::new(),
            stats: SourceStats::default(),
        }
    }
}

impl<C: FrameCapture> ChunkSource for CaptureSource<C> {
    fn next_chunk(&mut self) -> Result<Option<Chunk<'_>>, NetworkError> {
        loop {
            let Some(frame) = self.capture.next_frame()? else {
                return Ok(None);
            };
            match udp_payload(frame, self.port) {
                Some(payload) if payload.len() >= HEADER_SIZE => {
                    self.payload.clear();
                    self.payload.extend_from_slice(payload);
                    break;
                }
                Some(payload) => {
                    trace!("Captured payload shorter than header ({} bytes)", payload.len());
                    self.stats.record_invalid();
                }
                None => self.stats.record_invalid(),
            }
        }

        self.stats.record_chunk(self.payload.len());
        Chunk::parse(&self.payload).map(Some)
    }

    fn stats(&self) -> SourceStats {
        self.stats
    }
}

/// Reader for classic libpcap capture files
pub struct PcapFileReader<R: Read> {
    reader: R,
    swapped: bool,
    frame: Vec<u8>,
    /// Sleep once the file is exhausted, so callers polling for more do not spin
    idle_wait: Duration,
}

const PCAP_MAGIC_MICROS: u32 = 0xa1b2_c3d4;
const PCAP_MAGIC_NANOS: u32 = 0xa1b2_3c4d;
const LINKTYPE_ETHERNET: u32 = 1;
/// Upper bound on a single record, guards against corrupt lengths
const MAX_RECORD: usize = 262_144;

impl PcapFileReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, NetworkError> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| NetworkError::CaptureFailed(format!("{}: {}", path.display(), e)))?;
        info!("Replaying capture file {}", path.display());
        Self::new(BufReader::new(file))
    }
}

impl<R: Read> PcapFileReader<R> {
    pub fn new(mut reader: R) -> Result<Self, NetworkError> {
        let mut global = [0u8; 24];
        reader
            .read_exact(&mut global)
            .map_err(|e| NetworkError::CaptureFailed(format!("pcap header: {}", e)))?;

        let magic = u32::from_le_bytes([global[0], global[1], global[2], global[3]]);
        let swapped = match magic {
            PCAP_MAGIC_MICROS | PCAP_MAGIC_NANOS => false,
            m if m.swap_bytes() == PCAP_MAGIC_MICROS || m.swap_bytes() == PCAP_MAGIC_NANOS => true,
            _ => return Err(NetworkError::CaptureFailed("not a pcap file".into())),
        };

        let read_u32 = |b: &[u8]| {
            let v = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
            if swapped { v.swap_bytes() } else { v }
        };
        let linktype = read_u32(&global[20..24]);
        if linktype != LINKTYPE_ETHERNET {
            return Err(NetworkError::CaptureFailed(format!(
                "link type {} does not provide Ethernet headers",
                linktype
            )));
        }

        Ok(Self {
            reader,
            swapped,
            frame: Vec::new(),
            idle_wait: Duration::ZERO,
        })
    }

    /// Wait this long before each `None` after the end of the file
    pub fn with_idle_wait(mut self, idle_wait: Duration) -> Self {
        self.idle_wait = idle_wait;
        self
    }

    fn field(&self, b: &[u8]) -> u32 {
        let v = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
        if self.swapped {
            v.swap_bytes()
        } else {
            v
        }
    }
}

impl<R: Read> FrameCapture for PcapFileReader<R> {
    fn next_frame(&mut self) -> Result<Option<&[u8]>, NetworkError> {
        let mut record = [0u8; 16];
        match self.reader.read_exact(&mut record) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                if !self.idle_wait.is_zero() {
                    thread::sleep(self.idle_wait);
                }
                return Ok(None);
            }
            Err(e) => return Err(NetworkError::CaptureFailed(e.to_string())),
        }

        let captured = self.field(&record[8..12]) as usize;
        if captured > MAX_RECORD {
            return Err(NetworkError::CaptureFailed(format!("record of {} bytes", captured)));
        }
        self.frame.resize(captured, 0);
        self.reader
            .read_exact(&mut self.frame)
            .map_err(|e| NetworkError::CaptureFailed(e.to_string()))?;
        Ok(Some(&self.frame))
    }
}

/// Live capture on one interface through a Linux packet socket.
///
/// Sees the frames the interface sends and receives, without switching it
/// to promiscuous mode. Needs `CAP_NET_RAW`.
#[cfg(target_os = "linux")]
pub struct LiveCapture {
    socket: socket2::Socket,
    frame: Vec<u8>,
}

/// All ethertypes
#[cfg(target_os = "linux")]
const ETH_P_ALL: u16 = 0x0003;

/// Largest frame kept per read
#[cfg(target_os = "linux")]
const SNAPLEN: usize = 65_536;

/// `sockaddr_ll`, only ever read by the kernel
#[cfg(target_os = "linux")]
#[allow(dead_code)]
#[repr(C)]
struct LinkLayerAddr {
    family: u16,
    protocol: u16,
    ifindex: i32,
    hatype: u16,
    pkttype: u8,
    halen: u8,
    addr: [u8; 8],
}

#[cfg(target_os = "linux")]
fn link_layer_addr(ifindex: u32) -> Result<socket2::SockAddr, NetworkError> {
    let addr = LinkLayerAddr {
        family: i32::from(socket2::Domain::PACKET) as u16,
        protocol: ETH_P_ALL.to_be(),
        ifindex: ifindex as i32,
        hatype: 0,
        pkttype: 0,
        halen: 0,
        addr: [0; 8],
    };
    // SAFETY: sockaddr_storage is larger than and aligned for sockaddr_ll,
    // and the length written matches the struct written.
    let ((), sockaddr) = unsafe {
        socket2::SockAddr::try_init(|storage, len| {
            storage.cast::<LinkLayerAddr>().write(addr);
            len.write(std::mem::size_of::<LinkLayerAddr>() as _);
            Ok(())
        })
    }
    .map_err(|e| NetworkError::CaptureFailed(e.to_string()))?;
    Ok(sockaddr)
}

#[cfg(target_os = "linux")]
impl LiveCapture {
    /// Capture on `interface`; each read waits at most `idle_timeout`
    pub fn open(interface: &str, idle_timeout: Duration) -> Result<Self, NetworkError> {
        use socket2::{Domain, Protocol, Socket, Type};

        let ifindex = crate::transport::interface_index(interface)?;
        let protocol = Protocol::from(i32::from(ETH_P_ALL.to_be()));
        let socket = Socket::new(Domain::PACKET, Type::RAW, Some(protocol))
            .map_err(|e| NetworkError::CaptureFailed(format!("packet socket: {}", e)))?;
        socket
            .bind(&link_layer_addr(ifindex)?)
            .map_err(|e| NetworkError::CaptureFailed(format!("{}: {}", interface, e)))?;
        socket
            .set_read_timeout(Some(idle_timeout.max(Duration::from_millis(1))))
            .map_err(|e| NetworkError::CaptureFailed(e.to_string()))?;
        // Best effort; the OS may clamp it
        let _ = socket.set_recv_buffer_size(1 << 20);

        info!("Capturing on {} (index {})", interface, ifindex);
        Ok(Self {
            socket,
            frame: vec![0u8; SNAPLEN],
        })
    }
}

#[cfg(target_os = "linux")]
impl FrameCapture for LiveCapture {
    fn next_frame(&mut self) -> Result<Option<&[u8]>, NetworkError> {
        match self.socket.read(&mut self.frame) {
            Ok(n) => Ok(Some(&self.frame[..n])),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(NetworkError::CaptureFailed(e.to_string())),
        }
    }
}
