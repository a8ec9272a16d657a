//! cpal output backends
//!
//! cpal streams are driven by the host's audio thread and are not `Send` on
//! every platform, so each stream is built and kept alive on its own named
//! thread for as long as the output is open.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::audio::buffer::Sample;
use crate::audio::channel_map::ChannelRole;
use crate::audio::device::{find_output_device, max_output_channels, supports_output};
use crate::audio::pcm;
use crate::error::AudioError;
use crate::sink::blocking::{BlockingDevice, ChannelMapSupport, DeviceParams};
use crate::sink::callback::{fill_interleaved, RealtimeBackend, RealtimeConsumer};

/// How long to wait for the stream thread to report the stream started
const START_TIMEOUT: Duration = Duration::from_secs(2);

/// Keep-alive poll of the stream threads
const KEEPALIVE_INTERVAL: Duration = Duration::from_millis(10);

/// Frames per queued block on the blocking path
const BLOCK_FRAMES: usize = 256;

/// Shortest wait for room in the block queue before the stream counts as stalled
const MIN_STALL_TIMEOUT: Duration = Duration::from_millis(250);

/// Running stream thread
struct StreamThread {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl StreamThread {
    /// Spawn `name`, build the stream there with `build` and keep it playing
    /// until stopped. Returns once the stream is playing or failed to start.
    fn spawn<F>(name: &str, build: F) -> Result<Self, AudioError>
    where
        F: FnOnce() -> Result<cpal::Stream, AudioError> + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let running_for_loop = running.clone();
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build() {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(KEEPALIVE_INTERVAL);
                }
                // Stream is dropped here, stopping playback
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let mut thread = Self {
            running,
            handle: Some(handle),
        };
        match ready_rx.recv_timeout(START_TIMEOUT) {
            Ok(Ok(())) => Ok(thread),
            Ok(Err(e)) => {
                thread.stop();
                Err(e)
            }
            Err(_) => {
                thread.stop();
                Err(AudioError::StreamError("output stream did not start".into()))
            }
        }
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Output stream thread panicked");
            }
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn stall_timeout(latency_ms: u32) -> Duration {
    (Duration::from_millis(latency_ms as u64) * 4).max(MIN_STALL_TIMEOUT)
}

fn stream_config(channels: u16, rate: u32) -> StreamConfig {
    StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(rate),
        buffer_size: cpal::BufferSize::Default,
    }
}

/// Writer side of the block queue feeding a blocking output stream
struct BlockQueue {
    blocks: Sender<Vec<Sample>>,
    recycled: Receiver<Vec<Sample>>,
    errors: Receiver<AudioError>,
    underrun: Arc<AtomicBool>,
    sample_bits: u8,
    frame_bytes: usize,
    /// Longest a write waits for the stream to take a block
    stall_timeout: Duration,
}

impl BlockQueue {
    /// Decode up to one block of `data` and queue it. Returns the bytes
    /// consumed.
    fn push(&self, data: &[u8]) -> Result<usize, AudioError> {
        if let Ok(e) = self.errors.try_recv() {
            return Err(e);
        }
        if self.underrun.load(Ordering::Acquire) {
            return Err(AudioError::BufferUnderrun);
        }

        let take = data.len().min(BLOCK_FRAMES * self.frame_bytes);
        let take = take - take % self.frame_bytes.max(1);
        let mut block = self.recycled.try_recv().unwrap_or_default();
        block.clear();
        pcm::decode_le(&data[..take], self.sample_bits, &mut block);

        match self.blocks.send_timeout(block, self.stall_timeout) {
            Ok(()) => Ok(take),
            Err(SendTimeoutError::Timeout(_)) => Err(self.errors.try_recv().unwrap_or_else(|_| {
                AudioError::StreamError(format!(
                    "output stream took no audio for {:?}",
                    self.stall_timeout
                ))
            })),
            Err(SendTimeoutError::Disconnected(_)) => {
                Err(AudioError::WriteFailed("output stream stopped".into()))
            }
        }
    }
}

/// Open stream of a [`CpalBlockingDevice`]
struct BlockingStream {
    thread: StreamThread,
    queue: BlockQueue,
}

/// Blocking device on top of a cpal output stream.
///
/// Writes queue decoded blocks on a bounded channel sized from the target
/// latency; a full queue blocks the writer until the stream catches up, or
/// fails the write once the stream has taken nothing for a few latencies.
pub struct CpalBlockingDevice {
    device_name: Option<String>,
    stream: Option<BlockingStream>,
    underruns: Arc<AtomicU64>,
}

impl CpalBlockingDevice {
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            stream: None,
            underruns: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Times the stream ran dry after it had started playing
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }
}

impl BlockingDevice for CpalBlockingDevice {
    fn open(&mut self, params: &DeviceParams) -> Result<ChannelMapSupport, AudioError> {
        self.close()?;

        let device = find_output_device(self.device_name.as_deref())?;
        let channels = params.channels as u16;
        if !supports_output(&device, params.rate, channels) {
            return Err(AudioError::UnsupportedFormat(format!(
                "{} Hz with {} channels",
                params.rate, channels
            )));
        }

        let block_ms = (BLOCK_FRAMES as u64 * 1000 / params.rate.max(1) as u64).max(1);
        let depth = (params.latency_ms as u64 / block_ms).max(2) as usize;
        let (blocks_tx, blocks_rx) = bounded::<Vec<Sample>>(depth);
        let (recycle_tx, recycle_rx) = bounded::<Vec<Sample>>(depth + 2);
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let underrun = Arc::new(AtomicBool::new(false));

        let config = stream_config(channels, params.rate);
        let underrun_cb = underrun.clone();
        let underruns = self.underruns.clone();

        let thread = StreamThread::spawn("cpal-blocking-output", move || {
            let mut current: Vec<Sample> = Vec::new();
            let mut pos = 0usize;
            let mut playing = false;

            device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut filled = 0;
                        while filled < data.len() {
                            if pos >= current.len() {
                                let spent = std::mem::take(&mut current);
                                if spent.capacity() > 0 {
                                    let _ = recycle_tx.try_send(spent);
                                }
                                pos = 0;
                                match blocks_rx.try_recv() {
                                    Ok(block) => {
                                        current = block;
                                        playing = true;
                                    }
                                    Err(_) => {
                                        if playing {
                                            playing = false;
                                            underrun_cb.store(true, Ordering::Release);
                                            underruns.fetch_add(1, Ordering::Relaxed);
                                        }
                                        data[filled..].fill(0.0);
                                        return;
                                    }
                                }
                            }
                            let n = (current.len() - pos).min(data.len() - filled);
                            data[filled..filled + n].copy_from_slice(&current[pos..pos + n]);
                            pos += n;
                            filled += n;
                        }
                    },
                    move |err| {
                        let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                )
                .map_err(|e| AudioError::CpalError(e.to_string()))
        })?;

        debug!("Output queue depth {} blocks", depth);
        self.stream = Some(BlockingStream {
            thread,
            queue: BlockQueue {
                blocks: blocks_tx,
                recycled: recycle_rx,
                errors: error_rx,
                underrun,
                sample_bits: params.sample_bits,
                frame_bytes: params.frame_bytes(),
                stall_timeout: stall_timeout(params.latency_ms),
            },
        });

        // cpal exposes no positional layout; channels play in device order
        Ok(ChannelMapSupport::Unsupported)
    }

    fn write_frames(&mut self, data: &[u8]) -> Result<usize, AudioError> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| AudioError::WriteFailed("output not open".into()))?;
        stream.queue.push(data)
    }

    fn recover(&mut self, error: &AudioError) -> Result<(), AudioError> {
        match (error, self.stream.as_ref()) {
            (AudioError::BufferUnderrun, Some(stream)) => {
                stream.queue.underrun.store(false, Ordering::Release);
                Ok(())
            }
            _ => Err(AudioError::StreamError(format!("cannot recover from: {}", error))),
        }
    }

    fn close(&mut self) -> Result<(), AudioError> {
        if let Some(BlockingStream { mut thread, queue }) = self.stream.take() {
            drop(queue);
            thread.stop();
        }
        Ok(())
    }
}

/// Realtime backend on a cpal output stream.
///
/// The device's default output rate is the fixed clock; one stream channel
/// is opened per registered port.
pub struct CpalRealtimeBackend {
    device_name: Option<String>,
    device: cpal::Device,
    rate: u32,
    ports: Vec<ChannelRole>,
    thread: Option<StreamThread>,
}

impl CpalRealtimeBackend {
    pub fn new(device_name: Option<&str>) -> Result<Self, AudioError> {
        let device = find_output_device(device_name)?;
        let config = device
            .default_output_config()
            .map_err(|e| AudioError::CpalError(e.to_string()))?;
        let rate = config.sample_rate().0;
        info!(
            "Realtime output on {} at {} Hz",
            device.name().unwrap_or_else(|_| "unknown device".into()),
            rate
        );
        Ok(Self {
            device_name: device_name.map(str::to_string),
            device,
            rate,
            ports: Vec::new(),
            thread: None,
        })
    }

    /// Name of the host API in use
    pub fn host_name() -> &'static str {
        cpal::default_host().id().name()
    }
}

impl RealtimeBackend for CpalRealtimeBackend {
    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn register_ports(&mut self, roles: &[ChannelRole]) -> Result<(), AudioError> {
        if roles.is_empty() {
            return Err(AudioError::UnsupportedFormat("no output channels".into()));
        }
        self.ports = roles.to_vec();
        Ok(())
    }

    fn connect_physical(&mut self) -> Result<(), AudioError> {
        let available = max_output_channels(&self.device) as usize;
        if available < self.ports.len() {
            return Err(AudioError::UnsupportedFormat(format!(
                "{} ports but the device has {} outputs",
                self.ports.len(),
                available
            )));
        }
        Ok(())
    }

    fn activate(&mut self, mut consumer: Box<dyn RealtimeConsumer>) -> Result<(), AudioError> {
        self.deactivate()?;

        let channels = self.ports.len();
        let config = stream_config(channels as u16, self.rate);
        let device_name = self.device_name.clone();

        let thread = StreamThread::spawn("cpal-realtime-output", move || {
            let device = find_output_device(device_name.as_deref())?;
            device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        fill_interleaved(consumer.as_mut(), data, channels);
                    },
                    |err| {
                        // Host error thread, not the audio callback
                        warn!("Realtime stream error: {}", err);
                    },
                    None,
                )
                .map_err(|e| AudioError::CpalError(e.to_string()))
        })?;
        self.thread = Some(thread);
        Ok(())
    }

    fn deactivate(&mut self) -> Result<(), AudioError> {
        if let Some(mut thread) = self.thread.take() {
            thread.stop();
        }
        Ok(())
    }
}

impl Drop for CpalRealtimeBackend {
    fn drop(&mut self) {
        let _ = self.deactivate();
    }
}
