//! Receiver loop
//!
//! Pulls chunks from a [`ChunkSource`], detects format switches, reconfigures
//! the sink and hands it the payload. All per-stream state lives in a
//! [`ReceiverContext`] owned by the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::audio::format::FormatState;
use crate::error::{Error, Result};
use crate::protocol::Chunk;
use crate::sink::PlaybackSink;
use crate::transport::ChunkSource;

/// How often the loop reports statistics
pub const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Lifecycle of the applied format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No chunk seen yet
    Uninitialized,
    /// Sink configured and playing
    Active,
    /// Format unplayable or the sink failed; silent until the next switch
    Muted,
}

/// Receiver counters
#[derive(Debug, Clone, Copy, Default)]
pub struct ReceiverStats {
    pub chunks: u64,
    pub chunks_played: u64,
    pub chunks_muted: u64,
    pub format_changes: u64,
    pub sink_failures: u64,
}

/// Per-stream state driven by incoming chunks
pub struct ReceiverContext {
    format: FormatState,
    sink: PlaybackSink,
    state: StreamState,
    stats: ReceiverStats,
}

impl ReceiverContext {
    pub fn new(sink: PlaybackSink) -> Self {
        Self {
            format: FormatState::new(),
            sink,
            state: StreamState::Uninitialized,
            stats: ReceiverStats::default(),
        }
    }

    /// Apply one chunk.
    ///
    /// Only fatal errors are returned. Anything else mutes the stream until
    /// the sender switches format again.
    pub fn process_chunk(&mut self, chunk: Chunk<'_>) -> Result<()> {
        self.stats.chunks += 1;

        if let Some(event) = self.format.update(chunk.header) {
            self.stats.format_changes += 1;
            match self.sink.reconfigure(&event.format) {
                Ok(()) if event.format.is_playable() => self.state = StreamState::Active,
                Ok(()) => self.state = StreamState::Muted,
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    warn!("Output reconfiguration failed, muting until next format switch: {}", e);
                    self.stats.sink_failures += 1;
                    self.state = StreamState::Muted;
                }
            }
        }

        if self.state != StreamState::Active {
            self.stats.chunks_muted += 1;
            return Ok(());
        }
        if chunk.audio.is_empty() {
            return Ok(());
        }

        match self.sink.write(chunk.audio) {
            Ok(()) => {
                self.stats.chunks_played += 1;
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                error!("Playback failed, muting until next format switch: {}", e);
                self.stats.sink_failures += 1;
                self.state = StreamState::Muted;
                Ok(())
            }
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn format(&self) -> &FormatState {
        &self.format
    }

    pub fn sink(&self) -> &PlaybackSink {
        &self.sink
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats
    }

    /// Tear down the sink and forget the format
    pub fn shutdown(&mut self) -> Result<()> {
        self.format.reset();
        self.state = StreamState::Uninitialized;
        self.sink.shutdown().map_err(Error::from)
    }
}

/// Drives a source into a [`ReceiverContext`] until shut down
pub struct Receiver<S: ChunkSource> {
    source: S,
    context: ReceiverContext,
    shutdown: Arc<AtomicBool>,
}

impl<S: ChunkSource> Receiver<S> {
    pub fn new(source: S, sink: PlaybackSink) -> Self {
        Self {
            source,
            context: ReceiverContext::new(sink),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops [`run`](Self::run) at the next idle or chunk
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn context(&self) -> &ReceiverContext {
        &self.context
    }

    /// Receive and play until the shutdown flag is set or a fatal error.
    ///
    /// Transport errors that are not fatal are logged and the loop goes on.
    /// The sink is torn down before returning.
    pub fn run(&mut self) -> Result<()> {
        info!("Receiver running, output: {}", self.context.sink.kind());
        let mut last_stats = Instant::now();

        let result = loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break Ok(());
            }

            match self.source.next_chunk() {
                Ok(Some(chunk)) => {
                    if let Err(e) = self.context.process_chunk(chunk) {
                        break Err(e);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    let e = Error::from(e);
                    if e.is_fatal() {
                        break Err(e);
                    }
                    warn!("Transport error: {}", e);
                }
            }

            if last_stats.elapsed() >= STATS_INTERVAL {
                self.log_stats();
                last_stats = Instant::now();
            }
        };

        self.log_stats();
        if let Err(e) = self.context.shutdown() {
            warn!("Output shutdown failed: {}", e);
        }
        info!("Receiver stopped");
        result
    }

    fn log_stats(&self) {
        let source = self.source.stats();
        let receiver = self.context.stats();
        let sink = self.context.sink.stats();
        info!(
            "Stats: chunks={} bytes={} invalid={} played={} muted={} switches={} failures={} \
             writes={} overflows={} underruns={} fill={:.0}%",
            source.chunks_received,
            source.bytes_received,
            source.invalid_packets,
            receiver.chunks_played,
            receiver.chunks_muted,
            receiver.format_changes,
            receiver.sink_failures,
            sink.writes,
            sink.overflows,
            sink.underruns,
            sink.fill_level * 100.0
        );
    }
}
