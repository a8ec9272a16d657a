//! Realtime pull playback
//!
//! The device runs on its own clock and asks for audio from a realtime
//! thread. The receiver thread converts each chunk to the device rate and
//! pushes it into a [`RingBuffer`]; the device callback drains it through a
//! [`RealtimeConsumer`], which never blocks, locks or allocates.
//!
//! ```text
//!  receiver thread                           realtime thread
//!  ───────────────                           ───────────────
//!  chunk ─► Resampler ─► RingBuffer::push_slice
//!                               │
//!                               └──► RingConsumer::pull ─► device
//!                                    (zero-filled on underrun)
//! ```

use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::audio::buffer::{RingBuffer, Sample, SharedRingBuffer};
use crate::audio::channel_map::ChannelRole;
use crate::audio::format::ActiveFormat;
use crate::audio::resample::Resampler;
use crate::error::AudioError;

/// Largest period a consumer serves in one pull
pub const MAX_PERIOD_FRAMES: usize = 8192;

/// Producer side of a realtime callback.
///
/// `pull` is called from the realtime thread and must return promptly.
pub trait RealtimeConsumer: Send {
    /// Interleaved samples for up to `frames` frames. Returns fewer only when
    /// `frames` exceeds what the consumer can serve at once; the caller asks
    /// again for the rest.
    fn pull(&mut self, frames: usize) -> &[Sample];
}

/// Consumer draining a ring buffer into a preallocated period buffer
pub struct RingConsumer {
    ring: SharedRingBuffer,
    channels: usize,
    scratch: Box<[Sample]>,
}

impl RingConsumer {
    pub fn new(ring: SharedRingBuffer, channels: u8, max_frames: usize) -> Self {
        let channels = channels.max(1) as usize;
        Self {
            ring,
            channels,
            scratch: vec![0.0; max_frames.max(1) * channels].into_boxed_slice(),
        }
    }
}

impl RealtimeConsumer for RingConsumer {
    fn pull(&mut self, frames: usize) -> &[Sample] {
        let needed = frames.min(self.scratch.len() / self.channels) * self.channels;
        self.ring.drain_into(&mut self.scratch[..needed], needed);
        &self.scratch[..needed]
    }
}

/// Fill `out` from `consumer`, one period at a time
pub fn fill_interleaved(consumer: &mut dyn RealtimeConsumer, out: &mut [Sample], channels: usize) {
    let channels = channels.max(1);
    let mut filled = 0;
    while filled < out.len() {
        let frames = (out.len() - filled) / channels;
        if frames == 0 {
            break;
        }
        let samples = consumer.pull(frames);
        if samples.is_empty() {
            break;
        }
        out[filled..filled + samples.len()].copy_from_slice(samples);
        filled += samples.len();
    }
    out[filled..].fill(0.0);
}

/// Audio system driving a realtime callback
pub trait RealtimeBackend: Send {
    /// The device's fixed clock rate
    fn sample_rate(&self) -> u32;

    /// Create one output port per channel, replacing any previous ports
    fn register_ports(&mut self, roles: &[ChannelRole]) -> Result<(), AudioError>;

    /// Wire the registered ports to physical outputs
    fn connect_physical(&mut self) -> Result<(), AudioError>;

    /// Start invoking `consumer` from the realtime thread
    fn activate(&mut self, consumer: Box<dyn RealtimeConsumer>) -> Result<(), AudioError>;

    /// Stop the callback and release the ports
    fn deactivate(&mut self) -> Result<(), AudioError>;
}

/// Playback through a [`RealtimeBackend`]
pub struct CallbackSink {
    backend: Box<dyn RealtimeBackend>,
    latency_ms: u32,
    auto_connect: bool,
    ring: Option<SharedRingBuffer>,
    resampler: Resampler,
    active: Option<ActiveFormat>,
    live: bool,
    samples_dropped: u64,
}

impl CallbackSink {
    pub fn new(backend: Box<dyn RealtimeBackend>, latency_ms: u32, auto_connect: bool) -> Self {
        Self {
            backend,
            latency_ms,
            auto_connect,
            ring: None,
            resampler: Resampler::new(),
            active: None,
            live: false,
            samples_dropped: 0,
        }
    }

    /// Tear down and rebuild ports, ring buffer and resampler for `format`.
    ///
    /// A failed ring allocation is fatal; any other failure leaves the sink
    /// silent until the next format change.
    pub fn reconfigure(&mut self, format: &ActiveFormat) -> Result<(), AudioError> {
        if self.active.as_ref() == Some(format) {
            return Ok(());
        }

        self.teardown();
        self.active = Some(format.clone());
        if !format.is_playable() {
            return Ok(());
        }

        let device_rate = self.backend.sample_rate();
        let ring = match self.bring_up(format, device_rate) {
            Ok(ring) => ring,
            Err(e) => {
                // Release whatever ports were registered before the failure
                if let Err(release) = self.backend.deactivate() {
                    warn!("Failed to release realtime ports: {}", release);
                }
                self.resampler.reset();
                return Err(e);
            }
        };
        self.ring = Some(ring.clone());
        self.live = true;

        info!(
            "Realtime output live: {} Hz stream -> {} Hz device, ring of {} samples{}",
            format.rate,
            device_rate,
            ring.capacity(),
            if self.resampler.is_converting() { ", resampling" } else { "" }
        );
        Ok(())
    }

    /// Register ports, build ring and resampler, and start the callback
    fn bring_up(
        &mut self,
        format: &ActiveFormat,
        device_rate: u32,
    ) -> Result<SharedRingBuffer, AudioError> {
        self.backend.register_ports(&format.roles)?;
        for (index, role) in format.roles.iter().enumerate() {
            debug!("Port {} -> {}", index, role.port_name());
        }
        if self.auto_connect {
            if let Err(e) = self.backend.connect_physical() {
                warn!("Could not connect output ports: {}", e);
            }
        }

        let ring = Arc::new(RingBuffer::for_latency(
            self.latency_ms,
            device_rate,
            format.channels(),
        )?);
        self.resampler
            .reconfigure(format.rate, device_rate, format.channels(), format.sample_bits())?;

        let consumer = RingConsumer::new(ring.clone(), format.channels(), MAX_PERIOD_FRAMES);
        self.backend.activate(Box::new(consumer))?;
        Ok(ring)
    }

    /// Convert and queue interleaved PCM. Samples that do not fit are
    /// dropped.
    pub fn write(&mut self, data: &[u8]) -> Result<(), AudioError> {
        let Some(ring) = self.ring.as_ref().filter(|_| self.live) else {
            return Ok(());
        };
        let samples = self.resampler.process(data)?;
        let pushed = ring.push_slice(samples);
        if pushed < samples.len() {
            let dropped = samples.len() - pushed;
            trace!("Ring full, dropped {} samples", dropped);
            self.samples_dropped += dropped as u64;
        }
        Ok(())
    }

    pub fn shutdown(&mut self) -> Result<(), AudioError> {
        self.active = None;
        self.resampler.reset();
        self.ring = None;
        if self.live {
            self.live = false;
            self.backend.deactivate()?;
        }
        Ok(())
    }

    fn teardown(&mut self) {
        if self.live {
            self.live = false;
            if let Err(e) = self.backend.deactivate() {
                warn!("Failed to deactivate realtime output: {}", e);
            }
        }
        self.ring = None;
        self.resampler.reset();
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn active(&self) -> Option<&ActiveFormat> {
        self.active.as_ref()
    }

    /// Ring buffer shared with the realtime thread
    pub fn ring(&self) -> Option<&SharedRingBuffer> {
        self.ring.as_ref()
    }

    pub fn samples_dropped(&self) -> u64 {
        self.samples_dropped
    }
}
