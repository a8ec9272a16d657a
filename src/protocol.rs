//! Wire formats
//!
//! Every chunk starts with a 5 byte format header followed by interleaved
//! little-endian PCM:
//!
//! ```text
//! ┌───────────┬───────────┬──────────┬──────────────────┬──────────────────┐
//! │ rate code │ bits      │ channels │ channel mask (LE u16)│ PCM payload ... │
//! │  1 byte   │  1 byte   │  1 byte  │      2 bytes         │                 │
//! └───────────┴───────────┴──────────┴──────────────────┴──────────────────┘
//! ```
//!
//! The shared-memory transport carries the same format fields inside a
//! ring header, see [`ShmHeader`].

use crate::error::NetworkError;

/// Size of the per-chunk format header
pub const HEADER_SIZE: usize = 5;

/// Payload bytes in a standard chunk
pub const CHUNK_PAYLOAD_SIZE: usize = 1152;

/// Rate codes at or above this use the 44.1 kHz family
const RATE_FAMILY_44K: u8 = 128;

/// Format header carried by every chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FormatHeader {
    pub sample_rate_code: u8,
    pub sample_size_bits: u8,
    pub channels: u8,
    pub channel_mask: u16,
}

impl FormatHeader {
    pub fn new(sample_rate_code: u8, sample_size_bits: u8, channels: u8, channel_mask: u16) -> Self {
        Self {
            sample_rate_code,
            sample_size_bits,
            channels,
            channel_mask,
        }
    }

    /// Parse the header from the start of a datagram
    pub fn parse(bytes: &[u8]) -> Result<Self, NetworkError> {
        if bytes.len() < HEADER_SIZE {
            return Err(NetworkError::InvalidPacket);
        }
        Ok(Self {
            sample_rate_code: bytes[0],
            sample_size_bits: bytes[1],
            channels: bytes[2],
            channel_mask: u16::from_le_bytes([bytes[3], bytes[4]]),
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mask = self.channel_mask.to_le_bytes();
        [
            self.sample_rate_code,
            self.sample_size_bits,
            self.channels,
            mask[0],
            mask[1],
        ]
    }

    /// Decoded sample rate in Hz, 0 when the multiplier is zero
    pub fn sample_rate(&self) -> u32 {
        let base = if self.sample_rate_code >= RATE_FAMILY_44K {
            44_100
        } else {
            48_000
        };
        base * (self.sample_rate_code % RATE_FAMILY_44K) as u32
    }

    /// Bytes per sample for supported sizes
    pub fn bytes_per_sample(&self) -> Option<u8> {
        match self.sample_size_bits {
            16 | 24 | 32 => Some(self.sample_size_bits / 8),
            _ => None,
        }
    }

    /// Whether audio in this format can be played at all
    pub fn is_playable(&self) -> bool {
        self.sample_rate() > 0 && self.bytes_per_sample().is_some() && self.channels > 0
    }
}

/// One unit of audio as delivered by a transport
#[derive(Debug, Clone, Copy)]
pub struct Chunk<'a> {
    pub header: FormatHeader,
    pub audio: &'a [u8],
}

impl<'a> Chunk<'a> {
    /// Split a datagram into header and payload
    pub fn parse(datagram: &'a [u8]) -> Result<Self, NetworkError> {
        let header = FormatHeader::parse(datagram)?;
        Ok(Self {
            header,
            audio: &datagram[HEADER_SIZE..],
        })
    }
}

/// Marker written by the shared-memory producer while it is alive
pub const SHM_MAGIC: u32 = 0x1111_2014;

/// Size of the shared-memory ring header
pub const SHM_HEADER_SIZE: usize = 24;

/// Shared-memory ring header (naturally aligned, little-endian)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShmHeader {
    pub magic: u32,
    pub write_idx: u16,
    pub offset: u8,
    pub max_chunks: u16,
    pub chunk_size: u32,
    pub format: FormatHeader,
}

impl ShmHeader {
    pub fn parse(bytes: &[u8; SHM_HEADER_SIZE]) -> Self {
        Self {
            magic: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            write_idx: u16::from_le_bytes([bytes[4], bytes[5]]),
            offset: bytes[6],
            max_chunks: u16::from_le_bytes([bytes[8], bytes[9]]),
            chunk_size: u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
            format: FormatHeader {
                sample_rate_code: bytes[16],
                sample_size_bits: bytes[17],
                channels: bytes[18],
                channel_mask: u16::from_le_bytes([bytes[20], bytes[21]]),
            },
        }
    }

    pub fn to_bytes(&self) -> [u8; SHM_HEADER_SIZE] {
        let mut out = [0u8; SHM_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..6].copy_from_slice(&self.write_idx.to_le_bytes());
        out[6] = self.offset;
        out[8..10].copy_from_slice(&self.max_chunks.to_le_bytes());
        out[12..16].copy_from_slice(&self.chunk_size.to_le_bytes());
        out[16] = self.format.sample_rate_code;
        out[17] = self.format.sample_size_bits;
        out[18] = self.format.channels;
        out[20..22].copy_from_slice(&self.format.channel_mask.to_le_bytes());
        out
    }

    pub fn is_alive(&self) -> bool {
        self.magic == SHM_MAGIC
    }

    /// Byte offset of a slot from the start of the region
    pub fn slot_offset(&self, index: u16) -> u64 {
        self.offset as u64 + self.chunk_size as u64 * index as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_decoding() {
        assert_eq!(FormatHeader::new(1, 16, 2, 3).sample_rate(), 48_000);
        assert_eq!(FormatHeader::new(2, 16, 2, 3).sample_rate(), 96_000);
        assert_eq!(FormatHeader::new(129, 16, 2, 3).sample_rate(), 44_100);
        assert_eq!(FormatHeader::new(130, 16, 2, 3).sample_rate(), 88_200);
        assert_eq!(FormatHeader::new(128, 16, 2, 3).sample_rate(), 0);
        assert_eq!(FormatHeader::new(0, 16, 2, 3).sample_rate(), 0);
    }

    #[test]
    fn test_playable() {
        assert!(FormatHeader::new(129, 16, 2, 3).is_playable());
        assert!(FormatHeader::new(1, 24, 6, 0x3f).is_playable());
        assert!(!FormatHeader::new(1, 20, 2, 3).is_playable());
        assert!(!FormatHeader::new(128, 16, 2, 3).is_playable());
        assert!(!FormatHeader::new(1, 16, 0, 0).is_playable());
    }

    #[test]
    fn test_chunk_parse() {
        let datagram = [129u8, 16, 2, 0x03, 0x00, 0xAA, 0xBB];
        let chunk = Chunk::parse(&datagram).unwrap();
        assert_eq!(chunk.header, FormatHeader::new(129, 16, 2, 0x0003));
        assert_eq!(chunk.audio, &[0xAA, 0xBB]);

        // Header only is still a chunk
        assert!(Chunk::parse(&datagram[..HEADER_SIZE]).unwrap().audio.is_empty());
        assert!(Chunk::parse(&datagram[..4]).is_err());
    }

    #[test]
    fn test_channel_mask_little_endian() {
        let header = FormatHeader::parse(&[1, 16, 8, 0x3f, 0x06]).unwrap();
        assert_eq!(header.channel_mask, 0x063f);
        assert_eq!(header.to_bytes(), [1, 16, 8, 0x3f, 0x06]);
    }

    #[test]
    fn test_shm_header_layout() {
        let header = ShmHeader {
            magic: SHM_MAGIC,
            write_idx: 7,
            offset: SHM_HEADER_SIZE as u8,
            max_chunks: 100,
            chunk_size: 1920,
            format: FormatHeader::new(1, 16, 2, 3),
        };
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..4], &[0x14, 0x20, 0x11, 0x11]);
        assert_eq!(ShmHeader::parse(&bytes), header);
        assert!(header.is_alive());
        assert_eq!(header.slot_offset(2), 24 + 3840);
    }
}
