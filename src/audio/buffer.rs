//! Lock-free ring buffer for audio samples
//!
//! Single-producer single-consumer buffer between the receiver thread and
//! the realtime output callback. Positions are free-running `u32` counters;
//! the fill level is their wrapping difference and the slot index is the
//! position masked by the power-of-two capacity.
//!
//! Samples are stored as `f32` bit patterns in atomics so both sides can
//! share the storage without locks or `unsafe`.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::AudioError;

/// Native sample representation of the callback path
pub type Sample = f32;

/// Largest capacity for which the wrapping difference stays unambiguous
const MAX_CAPACITY: usize = 1 << 31;

/// Outcome of a [`RingBuffer::drain_into`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Drained {
    /// Samples available when the drain started
    pub available: usize,
    /// Samples actually copied
    pub copied: usize,
}

/// Fixed-capacity SPSC sample ring
pub struct RingBuffer {
    slots: Box<[AtomicU32]>,
    mask: u32,
    /// Advanced by the consumer only
    read_pos: AtomicU32,
    /// Advanced by the producer only
    write_pos: AtomicU32,
    overflow_count: AtomicU64,
    underrun_count: AtomicU64,
}

impl RingBuffer {
    /// Create a ring holding `capacity` samples. `capacity` must be a power
    /// of two.
    pub fn new(capacity: usize) -> Result<Self, AudioError> {
        Self::starting_at(capacity, 0)
    }

    /// Create a ring whose counters start at `position`
    pub fn starting_at(capacity: usize, position: u32) -> Result<Self, AudioError> {
        if capacity == 0 || !capacity.is_power_of_two() || capacity > MAX_CAPACITY {
            return Err(AudioError::UnsupportedFormat(format!(
                "ring capacity {} is not a power of two in 1..={}",
                capacity, MAX_CAPACITY
            )));
        }

        let mut slots = Vec::new();
        slots.try_reserve_exact(capacity).map_err(|e| {
            AudioError::ResourceExhausted(format!("ring buffer of {} samples: {}", capacity, e))
        })?;
        slots.resize_with(capacity, || AtomicU32::new(0));

        Ok(Self {
            slots: slots.into_boxed_slice(),
            mask: (capacity - 1) as u32,
            read_pos: AtomicU32::new(position),
            write_pos: AtomicU32::new(position),
            overflow_count: AtomicU64::new(0),
            underrun_count: AtomicU64::new(0),
        })
    }

    /// Size a ring for `latency_ms` of interleaved audio
    pub fn for_latency(latency_ms: u32, rate: u32, channels: u8) -> Result<Self, AudioError> {
        Self::new(capacity_for_latency(latency_ms, rate, channels))
    }

    /// Push one sample. Dropped (and counted) when the ring is full.
    pub fn push(&self, sample: Sample) -> bool {
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Acquire);
        if write.wrapping_sub(read) as usize >= self.slots.len() {
            self.overflow_count.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.slots[(write & self.mask) as usize].store(sample.to_bits(), Ordering::Relaxed);
        self.write_pos.store(write.wrapping_add(1), Ordering::Release);
        true
    }

    /// Push as many samples as fit, returns how many were stored
    pub fn push_slice(&self, samples: &[Sample]) -> usize {
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Acquire);
        let free = self.slots.len() - write.wrapping_sub(read) as usize;
        let count = samples.len().min(free);

        for (i, sample) in samples[..count].iter().enumerate() {
            let pos = write.wrapping_add(i as u32);
            self.slots[(pos & self.mask) as usize].store(sample.to_bits(), Ordering::Relaxed);
        }
        self.write_pos
            .store(write.wrapping_add(count as u32), Ordering::Release);

        let dropped = samples.len() - count;
        if dropped > 0 {
            self.overflow_count.fetch_add(dropped as u64, Ordering::Relaxed);
        }
        count
    }

    /// Pop one sample, `None` when empty
    pub fn pop(&self) -> Option<Sample> {
        let read = self.read_pos.load(Ordering::Relaxed);
        let write = self.write_pos.load(Ordering::Acquire);
        if read == write {
            return None;
        }
        let bits = self.slots[(read & self.mask) as usize].load(Ordering::Relaxed);
        self.read_pos.store(read.wrapping_add(1), Ordering::Release);
        Some(Sample::from_bits(bits))
    }

    /// Copy up to `needed` samples into `dst` and zero-fill the shortfall.
    ///
    /// Never blocks and never allocates, so it is safe to call from a
    /// realtime callback. `needed` is clamped to `dst.len()`.
    pub fn drain_into(&self, dst: &mut [Sample], needed: usize) -> Drained {
        let needed = needed.min(dst.len());
        let read = self.read_pos.load(Ordering::Relaxed);
        let write = self.write_pos.load(Ordering::Acquire);
        let available = write.wrapping_sub(read) as usize;
        let copied = needed.min(available);

        for (i, out) in dst[..copied].iter_mut().enumerate() {
            let pos = read.wrapping_add(i as u32);
            *out = Sample::from_bits(self.slots[(pos & self.mask) as usize].load(Ordering::Relaxed));
        }
        dst[copied..needed].fill(0.0);
        self.read_pos
            .store(read.wrapping_add(copied as u32), Ordering::Release);

        if copied < needed {
            self.underrun_count.fetch_add(1, Ordering::Relaxed);
        }
        Drained { available, copied }
    }

    /// Samples currently buffered
    pub fn len(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        write.wrapping_sub(read) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.slots.len()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn read_pos(&self) -> u32 {
        self.read_pos.load(Ordering::Acquire)
    }

    pub fn write_pos(&self) -> u32 {
        self.write_pos.load(Ordering::Acquire)
    }

    /// Samples dropped because the ring was full
    pub fn overflow_count(&self) -> u64 {
        self.overflow_count.load(Ordering::Relaxed)
    }

    /// Drains that had to pad with silence
    pub fn underrun_count(&self) -> u64 {
        self.underrun_count.load(Ordering::Relaxed)
    }

    /// Fill level as a fraction of capacity
    pub fn fill_level(&self) -> f32 {
        self.len() as f32 / self.capacity() as f32
    }
}

/// Thread-safe handle to a ring buffer
pub type SharedRingBuffer = Arc<RingBuffer>;

/// Ring capacity in samples for a latency target
pub fn capacity_for_latency(latency_ms: u32, rate: u32, channels: u8) -> usize {
    let frames = (latency_ms as u64 * rate as u64 / 1000).max(1);
    let samples = frames * channels.max(1) as u64;
    (samples as usize).next_power_of_two().min(MAX_CAPACITY)
}
