//! Playback sinks
//!
//! The backend family is chosen once at startup; the sink is then
//! reconfigured on every format change. Both variants share one lifecycle:
//! the previous device or ports are always torn down before new ones are
//! created, and reconfiguring with the applied format is a no-op.

pub mod blocking;
pub mod callback;
pub mod cpal_output;
pub mod raw;

pub use blocking::{BlockingDevice, BlockingSink, ChannelMapSupport, DeviceParams};
pub use callback::{CallbackSink, RealtimeBackend, RealtimeConsumer, RingConsumer};
pub use cpal_output::{CpalBlockingDevice, CpalRealtimeBackend};
pub use raw::RawDevice;

use crate::audio::format::ActiveFormat;
use crate::error::AudioError;

/// Sink counters
#[derive(Debug, Clone, Copy, Default)]
pub struct SinkStats {
    /// Chunks handed to a blocking device
    pub writes: u64,
    pub bytes_written: u64,
    pub recoveries: u64,
    /// Samples dropped because the ring was full
    pub overflows: u64,
    /// Realtime periods that were padded with silence
    pub underruns: u64,
    /// Ring fill level, 0.0 to 1.0
    pub fill_level: f32,
}

/// Playback backend
pub enum PlaybackSink {
    Blocking(BlockingSink),
    Callback(CallbackSink),
}

impl PlaybackSink {
    pub fn reconfigure(&mut self, format: &ActiveFormat) -> Result<(), AudioError> {
        match self {
            PlaybackSink::Blocking(sink) => sink.reconfigure(format),
            PlaybackSink::Callback(sink) => sink.reconfigure(format),
        }
    }

    /// Hand interleaved PCM in the active format to the backend
    pub fn write(&mut self, data: &[u8]) -> Result<(), AudioError> {
        match self {
            PlaybackSink::Blocking(sink) => sink.write(data),
            PlaybackSink::Callback(sink) => sink.write(data),
        }
    }

    pub fn shutdown(&mut self) -> Result<(), AudioError> {
        match self {
            PlaybackSink::Blocking(sink) => sink.shutdown(),
            PlaybackSink::Callback(sink) => sink.shutdown(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PlaybackSink::Blocking(_) => "blocking",
            PlaybackSink::Callback(_) => "callback",
        }
    }

    pub fn stats(&self) -> SinkStats {
        match self {
            PlaybackSink::Blocking(sink) => SinkStats {
                writes: sink.writes(),
                bytes_written: sink.bytes_written(),
                recoveries: sink.recoveries(),
                ..SinkStats::default()
            },
            PlaybackSink::Callback(sink) => {
                let mut stats = SinkStats {
                    overflows: sink.samples_dropped(),
                    ..SinkStats::default()
                };
                if let Some(ring) = sink.ring() {
                    stats.underruns = ring.underrun_count();
                    stats.fill_level = ring.fill_level();
                }
                stats
            }
        }
    }
}

impl From<BlockingSink> for PlaybackSink {
    fn from(sink: BlockingSink) -> Self {
        PlaybackSink::Blocking(sink)
    }
}

impl From<CallbackSink> for PlaybackSink {
    fn from(sink: CallbackSink) -> Self {
        PlaybackSink::Callback(sink)
    }
}
