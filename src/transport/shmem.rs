//! Shared-memory ring transport
//!
//! The producer (a VM's audio driver) owns a region laid out as a
//! [`ShmHeader`] followed by `max_chunks` fixed-size slots. It writes a slot,
//! then publishes its index in `write_idx`. The reader keeps its own index,
//! steps it forward (wrapping at `max_chunks`) and copies the slot out before
//! the producer can come round to it again.

use std::fs::File;
use std::io;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::NetworkError;
use crate::protocol::{Chunk, ShmHeader, SHM_HEADER_SIZE};
use crate::transport::{ChunkSource, SourceStats};

/// Readable shared memory region
pub trait SharedRegion: Send {
    /// Fill `buf` from `offset` bytes into the region
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Size of the region in bytes
    fn size(&self) -> io::Result<u64>;
}

#[cfg(unix)]
impl SharedRegion for File {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        std::os::unix::fs::FileExt::read_exact_at(self, buf, offset)
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }
}

#[cfg(windows)]
impl SharedRegion for File {
    fn read_at(&self, mut offset: u64, mut buf: &mut [u8]) -> io::Result<()> {
        use std::os::windows::fs::FileExt;
        while !buf.is_empty() {
            let n = self.seek_read(buf, offset)?;
            if n == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            buf = &mut std::mem::take(&mut buf)[n..];
            offset += n as u64;
        }
        Ok(())
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }
}

impl SharedRegion for Vec<u8> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let start = usize::try_from(offset).map_err(|_| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        let src = self
            .get(start..start + buf.len())
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.len() as u64)
    }
}

impl<R: SharedRegion + Sync> SharedRegion for std::sync::Arc<R> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        (**self).read_at(offset, buf)
    }

    fn size(&self) -> io::Result<u64> {
        (**self).size()
    }
}

impl<R: SharedRegion> SharedRegion for parking_lot::Mutex<R> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.lock().read_at(offset, buf)
    }

    fn size(&self) -> io::Result<u64> {
        self.lock().size()
    }
}

/// Chunk source polling a shared-memory ring
pub struct ShmemSource<R: SharedRegion> {
    region: R,
    region_size: u64,
    read_idx: u16,
    producer_alive: bool,
    poll_interval: Duration,
    idle_timeout: Duration,
    buf: Vec<u8>,
    stats: SourceStats,
}

impl ShmemSource<File> {
    /// Open a shared memory file such as `/dev/shm/ivshmem`
    pub fn open(
        path: impl AsRef<Path>,
        poll_interval: Duration,
        idle_timeout: Duration,
    ) -> Result<Self, NetworkError> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| NetworkError::SharedMemory(format!("{}: {}", path.display(), e)))?;
        info!("Opened shared memory region {}", path.display());
        Self::new(file, poll_interval, idle_timeout)
    }
}

impl<R: SharedRegion> ShmemSource<R> {
    /// Attach to a region and start reading after the producer's current
    /// write position
    pub fn new(region: R, poll_interval: Duration, idle_timeout: Duration) -> Result<Self, NetworkError> {
        let region_size = region
            .size()
            .map_err(|e| NetworkError::SharedMemory(e.to_string()))?;
        let mut source = Self {
            region,
            region_size,
            read_idx: 0,
            producer_alive: false,
            poll_interval,
            idle_timeout,
            buf: Vec::new(),
            stats: SourceStats::default(),
        };
        let header = source.read_header()?;
        if header.is_alive() {
            source.read_idx = header.write_idx;
            source.producer_alive = true;
        }
        Ok(source)
    }

    fn read_header(&self) -> Result<ShmHeader, NetworkError> {
        let mut raw = [0u8; SHM_HEADER_SIZE];
        self.region
            .read_at(0, &mut raw)
            .map_err(|e| NetworkError::SharedMemory(e.to_string()))?;
        Ok(ShmHeader::parse(&raw))
    }

    /// Reader's slot index
    pub fn read_index(&self) -> u16 {
        self.read_idx
    }

    pub fn is_producer_alive(&self) -> bool {
        self.producer_alive
    }

    /// Wait for the next published slot. Returns the header to use for it.
    fn wait_for_slot(&mut self) -> Result<Option<ShmHeader>, NetworkError> {
        let deadline = Instant::now() + self.idle_timeout;
        loop {
            let header = self.read_header()?;

            if !header.is_alive() {
                if self.producer_alive {
                    warn!("Shared memory producer went away, waiting for it to return");
                    self.producer_alive = false;
                }
            } else if !self.producer_alive {
                info!("Shared memory producer present, write index {}", header.write_idx);
                self.producer_alive = true;
                self.read_idx = header.write_idx;
            } else if self.read_idx != header.write_idx {
                if header.format.channels == 0 || header.format.channel_mask == 0 || header.max_chunks == 0 {
                    // Producer is still filling in the header
                    debug!("Shared memory header not ready yet");
                } else {
                    return Ok(Some(header));
                }
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(self.poll_interval);
        }
    }
}

impl<R: SharedRegion> ChunkSource for ShmemSource<R> {
    fn next_chunk(&mut self) -> Result<Option<Chunk<'_>>, NetworkError> {
        let Some(header) = self.wait_for_slot()? else {
            return Ok(None);
        };

        self.read_idx = self.read_idx.wrapping_add(1);
        if self.read_idx >= header.max_chunks {
            self.read_idx = 0;
        }

        let offset = header.slot_offset(self.read_idx);
        let fits = offset
            .checked_add(header.chunk_size as u64)
            .is_some_and(|end| end <= self.region_size);
        if !fits {
            warn!(
                "Shared memory slot {} ({} bytes at {}) lies outside the {} byte region",
                self.read_idx, header.chunk_size, offset, self.region_size
            );
            self.stats.record_invalid();
            return Ok(None);
        }

        self.buf.resize(header.chunk_size as usize, 0);
        if let Err(e) = self.region.read_at(offset, &mut self.buf) {
            // A slot outside the region is a producer bug, skip it
            warn!("Shared memory slot {} unreadable: {}", self.read_idx, e);
            self.stats.record_invalid();
            return Ok(None);
        }

        self.stats.record_chunk(self.buf.len());
        Ok(Some(Chunk {
            header: header.format,
            audio: &self.buf,
        }))
    }

    fn stats(&self) -> SourceStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FormatHeader, SHM_MAGIC};
    use std::io::{Seek, SeekFrom, Write};
    use std::sync::Arc;

    const CHUNK: u32 = 16;
    const SLOTS: u16 = 4;

    fn header(write_idx: u16, magic: u32) -> ShmHeader {
        ShmHeader {
            magic,
            write_idx,
            offset: SHM_HEADER_SIZE as u8,
            max_chunks: SLOTS,
            chunk_size: CHUNK,
            format: FormatHeader::new(1, 16, 2, 0x0003),
        }
    }

    fn region(write_idx: u16, magic: u32) -> Vec<u8> {
        let mut bytes = header(write_idx, magic).to_bytes().to_vec();
        for slot in 0..SLOTS {
            bytes.extend(std::iter::repeat(slot as u8 + 1).take(CHUNK as usize));
        }
        bytes
    }

    fn fast() -> (Duration, Duration) {
        (Duration::from_millis(1), Duration::from_millis(20))
    }

    #[test]
    fn test_starts_at_write_index() {
        let (poll, idle) = fast();
        let mut source = ShmemSource::new(region(2, SHM_MAGIC), poll, idle).unwrap();
        assert_eq!(source.read_index(), 2);
        // Nothing new published yet
        assert!(source.next_chunk().unwrap().is_none());
    }

    #[test]
    fn test_reads_published_slots_and_wraps() {
        let (poll, idle) = fast();
        let shared = Arc::new(parking_lot::Mutex::new(region(2, SHM_MAGIC)));
        let mut source = ShmemSource::new(shared.clone(), poll, idle).unwrap();

        // Producer published slots 3 and 0
        shared.lock()[..SHM_HEADER_SIZE].copy_from_slice(&header(0, SHM_MAGIC).to_bytes());

        let chunk = source.next_chunk().unwrap().unwrap();
        assert_eq!(chunk.audio, &[4u8; CHUNK as usize]);
        assert_eq!(chunk.header.sample_rate(), 48_000);
        let chunk = source.next_chunk().unwrap().unwrap();
        assert_eq!(chunk.audio, &[1u8; CHUNK as usize]);
        assert_eq!(source.read_index(), 0);
        assert!(source.next_chunk().unwrap().is_none());
        assert_eq!(source.stats().chunks_received, 2);
    }

    #[test]
    fn test_resyncs_after_producer_restart() {
        let (poll, idle) = fast();
        let shared = Arc::new(parking_lot::Mutex::new(region(1, SHM_MAGIC)));
        let mut source = ShmemSource::new(shared.clone(), poll, idle).unwrap();

        // Producer stops: magic cleared
        shared.lock()[..SHM_HEADER_SIZE].copy_from_slice(&header(1, 0).to_bytes());
        assert!(source.next_chunk().unwrap().is_none());
        assert!(!source.is_producer_alive());

        // Producer returns at a different position; old slots are skipped
        shared.lock()[..SHM_HEADER_SIZE].copy_from_slice(&header(3, SHM_MAGIC).to_bytes());
        assert!(source.next_chunk().unwrap().is_none());
        assert!(source.is_producer_alive());
        assert_eq!(source.read_index(), 3);
    }

    #[test]
    fn test_waits_for_header_to_be_filled_in() {
        let (poll, idle) = fast();
        let shared = Arc::new(parking_lot::Mutex::new(region(2, SHM_MAGIC)));
        let mut source = ShmemSource::new(shared.clone(), poll, idle).unwrap();

        // Slot 3 published before the format fields are written
        let mut incomplete = header(3, SHM_MAGIC);
        incomplete.format = FormatHeader::new(1, 16, 0, 0);
        shared.lock()[..SHM_HEADER_SIZE].copy_from_slice(&incomplete.to_bytes());
        assert!(source.next_chunk().unwrap().is_none());
        assert_eq!(source.read_index(), 2);

        incomplete.format = FormatHeader::new(1, 16, 2, 0);
        shared.lock()[..SHM_HEADER_SIZE].copy_from_slice(&incomplete.to_bytes());
        assert!(source.next_chunk().unwrap().is_none());

        let mut no_slots = header(3, SHM_MAGIC);
        no_slots.max_chunks = 0;
        shared.lock()[..SHM_HEADER_SIZE].copy_from_slice(&no_slots.to_bytes());
        assert!(source.next_chunk().unwrap().is_none());
        assert_eq!(source.read_index(), 2);

        shared.lock()[..SHM_HEADER_SIZE].copy_from_slice(&header(3, SHM_MAGIC).to_bytes());
        let chunk = source.next_chunk().unwrap().unwrap();
        assert_eq!(chunk.audio, &[4u8; CHUNK as usize]);
        assert_eq!(source.stats().chunks_received, 1);
    }

    #[test]
    fn test_rejects_chunk_size_beyond_region() {
        let (poll, idle) = fast();
        let shared = Arc::new(parking_lot::Mutex::new(region(2, SHM_MAGIC)));
        let mut source = ShmemSource::new(shared.clone(), poll, idle).unwrap();

        let mut huge = header(3, SHM_MAGIC);
        huge.chunk_size = u32::MAX;
        shared.lock()[..SHM_HEADER_SIZE].copy_from_slice(&huge.to_bytes());

        assert!(source.next_chunk().unwrap().is_none());
        assert_eq!(source.stats().invalid_packets, 1);
        assert_eq!(source.stats().chunks_received, 0);
    }

    #[test]
    fn test_file_backed_region() {
        let (poll, idle) = fast();
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&region(3, SHM_MAGIC)).unwrap();
        let mut source = ShmemSource::new(file.try_clone().unwrap(), poll, idle).unwrap();

        file.seek(SeekFrom::Start(0)).unwrap();
        file.write_all(&header(0, SHM_MAGIC).to_bytes()).unwrap();
        file.flush().unwrap();

        let chunk = source.next_chunk().unwrap().unwrap();
        assert_eq!(chunk.audio, &[1u8; CHUNK as usize]);
    }
}
