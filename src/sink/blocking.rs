//! Write-and-block playback
//!
//! The device is reopened at the stream's native rate and layout on every
//! format change, so no resampling happens on this path. Backpressure is the
//! device write itself.

use tracing::{debug, info, warn};

use crate::audio::channel_map::ChannelRole;
use crate::audio::format::ActiveFormat;
use crate::error::AudioError;

/// Parameters a blocking device is opened with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceParams {
    pub rate: u32,
    pub sample_bits: u8,
    pub channels: u8,
    /// Position of each interleaved channel
    pub roles: Vec<ChannelRole>,
    pub latency_ms: u32,
}

impl DeviceParams {
    pub fn from_format(format: &ActiveFormat, latency_ms: u32) -> Self {
        Self {
            rate: format.rate,
            sample_bits: format.sample_bits(),
            channels: format.channels(),
            roles: format.roles.clone(),
            latency_ms,
        }
    }

    /// Bytes in one interleaved frame
    pub fn frame_bytes(&self) -> usize {
        self.sample_bits as usize / 8 * self.channels as usize
    }
}

/// Whether the device honoured the requested channel positions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMapSupport {
    Applied,
    /// Device plays channels in its own default order
    Unsupported,
}

/// A device that accepts interleaved PCM and blocks until it is consumed
pub trait BlockingDevice: Send {
    /// Open (or reopen) for `params`
    fn open(&mut self, params: &DeviceParams) -> Result<ChannelMapSupport, AudioError>;

    /// Write whole frames, returning how many bytes the device took
    fn write_frames(&mut self, data: &[u8]) -> Result<usize, AudioError>;

    /// Recover in place from a recoverable write error
    fn recover(&mut self, error: &AudioError) -> Result<(), AudioError>;

    fn close(&mut self) -> Result<(), AudioError>;
}

/// Playback through a [`BlockingDevice`]
pub struct BlockingSink {
    device: Box<dyn BlockingDevice>,
    latency_ms: u32,
    active: Option<ActiveFormat>,
    open: bool,
    writes: u64,
    bytes_written: u64,
    recoveries: u64,
}

impl BlockingSink {
    pub fn new(device: Box<dyn BlockingDevice>, latency_ms: u32) -> Self {
        Self {
            device,
            latency_ms,
            active: None,
            open: false,
            writes: 0,
            bytes_written: 0,
            recoveries: 0,
        }
    }

    /// Close the device and reopen it for `format`.
    ///
    /// Reconfiguring with the format already applied does nothing. An
    /// unplayable format leaves the device closed.
    pub fn reconfigure(&mut self, format: &ActiveFormat) -> Result<(), AudioError> {
        if self.active.as_ref() == Some(format) {
            return Ok(());
        }

        self.close_device();
        self.active = Some(format.clone());
        if !format.is_playable() {
            return Ok(());
        }

        let params = DeviceParams::from_format(format, self.latency_ms);
        let support = self.device.open(&params)?;
        self.open = true;

        info!(
            "Output opened: {} Hz, {} bit, {} channels",
            params.rate, params.sample_bits, params.channels
        );
        if support == ChannelMapSupport::Unsupported && params.channels > 2 {
            warn!("Device cannot apply the channel map, channel order may be wrong");
        }
        Ok(())
    }

    /// Write interleaved PCM in the active format.
    ///
    /// A recoverable device error is retried once after recovery; anything
    /// else is returned.
    pub fn write(&mut self, data: &[u8]) -> Result<(), AudioError> {
        let Some(format) = self.active.as_ref().filter(|_| self.open) else {
            return Ok(());
        };
        let frame_bytes = format.frame_bytes();
        let usable = data.len() - data.len() % frame_bytes;
        if usable == 0 {
            return Ok(());
        }

        let mut remaining = &data[..usable];
        let mut retried = false;
        while !remaining.is_empty() {
            match self.device.write_frames(remaining) {
                Ok(0) => {
                    return Err(AudioError::WriteFailed("device accepted no data".into()));
                }
                Ok(n) => {
                    if n < remaining.len() {
                        debug!("Short write: {} of {} bytes", n, remaining.len());
                    }
                    remaining = &remaining[n.min(remaining.len())..];
                }
                Err(e) if e.is_recoverable() && !retried => {
                    debug!("Recovering output device: {}", e);
                    self.device.recover(&e)?;
                    self.recoveries += 1;
                    retried = true;
                }
                Err(e) => return Err(e),
            }
        }

        self.writes += 1;
        self.bytes_written += usable as u64;
        Ok(())
    }

    /// Close the device
    pub fn shutdown(&mut self) -> Result<(), AudioError> {
        self.active = None;
        if self.open {
            self.open = false;
            self.device.close()?;
        }
        Ok(())
    }

    fn close_device(&mut self) {
        if self.open {
            self.open = false;
            if let Err(e) = self.device.close() {
                warn!("Failed to close output device: {}", e);
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn active(&self) -> Option<&ActiveFormat> {
        self.active.as_ref()
    }

    /// Completed writes
    pub fn writes(&self) -> u64 {
        self.writes
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn recoveries(&self) -> u64 {
        self.recoveries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FormatHeader;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;

    #[derive(Default)]
    struct Log {
        opens: Vec<DeviceParams>,
        closes: usize,
        writes: Vec<Vec<u8>>,
        recovers: usize,
        script: VecDeque<Result<Option<usize>, AudioError>>,
        no_channel_map: bool,
    }

    /// Device whose write results can be scripted; `Ok(None)` takes everything
    struct ScriptedDevice(Arc<Mutex<Log>>);

    impl BlockingDevice for ScriptedDevice {
        fn open(&mut self, params: &DeviceParams) -> Result<ChannelMapSupport, AudioError> {
            let mut log = self.0.lock();
            log.opens.push(params.clone());
            if log.no_channel_map {
                Ok(ChannelMapSupport::Unsupported)
            } else {
                Ok(ChannelMapSupport::Applied)
            }
        }

        fn write_frames(&mut self, data: &[u8]) -> Result<usize, AudioError> {
            let mut log = self.0.lock();
            let n = match log.script.pop_front() {
                Some(Ok(Some(n))) => n.min(data.len()),
                Some(Err(e)) => return Err(e),
                _ => data.len(),
            };
            log.writes.push(data[..n].to_vec());
            Ok(n)
        }

        fn recover(&mut self, _error: &AudioError) -> Result<(), AudioError> {
            self.0.lock().recovers += 1;
            Ok(())
        }

        fn close(&mut self) -> Result<(), AudioError> {
            self.0.lock().closes += 1;
            Ok(())
        }
    }

    fn sink() -> (BlockingSink, Arc<Mutex<Log>>) {
        let log = Arc::new(Mutex::new(Log::default()));
        (BlockingSink::new(Box::new(ScriptedDevice(log.clone())), 50), log)
    }

    fn stereo_16() -> ActiveFormat {
        ActiveFormat::from_header(FormatHeader::new(129, 16, 2, 0x0003))
    }

    #[test]
    fn test_reconfigure_is_idempotent() {
        let (mut sink, log) = sink();
        sink.reconfigure(&stereo_16()).unwrap();
        sink.reconfigure(&stereo_16()).unwrap();

        let log = log.lock();
        assert_eq!(log.opens.len(), 1);
        assert_eq!(log.closes, 0);
        assert_eq!(log.opens[0].rate, 44_100);
        assert_eq!(log.opens[0].roles, vec![ChannelRole::FrontLeft, ChannelRole::FrontRight]);
    }

    #[test]
    fn test_close_precedes_reopen() {
        let (mut sink, log) = sink();
        sink.reconfigure(&stereo_16()).unwrap();
        sink.reconfigure(&ActiveFormat::from_header(FormatHeader::new(2, 24, 2, 0x0003)))
            .unwrap();

        let log = log.lock();
        assert_eq!(log.opens.len(), 2);
        assert_eq!(log.closes, 1);
        assert_eq!(log.opens[1].rate, 96_000);
    }

    #[test]
    fn test_unplayable_format_leaves_device_closed() {
        let (mut sink, log) = sink();
        sink.reconfigure(&stereo_16()).unwrap();
        sink.reconfigure(&ActiveFormat::from_header(FormatHeader::new(1, 20, 2, 0x0003)))
            .unwrap();
        assert!(!sink.is_open());
        sink.write(&[0u8; 16]).unwrap();

        let log = log.lock();
        assert_eq!(log.closes, 1);
        assert!(log.writes.is_empty());
    }

    #[test]
    fn test_short_writes_are_completed() {
        let (mut sink, log) = sink();
        sink.reconfigure(&stereo_16()).unwrap();
        log.lock().script.push_back(Ok(Some(8)));

        sink.write(&[1u8; 32]).unwrap();
        let log = log.lock();
        assert_eq!(log.writes.len(), 2);
        assert_eq!(log.writes[0].len(), 8);
        assert_eq!(log.writes[1].len(), 24);
        assert_eq!(sink.bytes_written(), 32);
    }

    #[test]
    fn test_partial_frame_is_truncated() {
        let (mut sink, log) = sink();
        sink.reconfigure(&stereo_16()).unwrap();
        sink.write(&[1u8; 10]).unwrap();
        assert_eq!(log.lock().writes[0].len(), 8);
    }

    #[test]
    fn test_underrun_recovered_once() {
        let (mut sink, log) = sink();
        sink.reconfigure(&stereo_16()).unwrap();
        log.lock().script.push_back(Err(AudioError::BufferUnderrun));

        sink.write(&[1u8; 8]).unwrap();
        assert_eq!(log.lock().recovers, 1);
        assert_eq!(sink.recoveries(), 1);
    }

    #[test]
    fn test_second_underrun_is_returned() {
        let (mut sink, log) = sink();
        sink.reconfigure(&stereo_16()).unwrap();
        {
            let mut log = log.lock();
            log.script.push_back(Err(AudioError::BufferUnderrun));
            log.script.push_back(Err(AudioError::BufferUnderrun));
        }

        assert!(matches!(sink.write(&[1u8; 8]), Err(AudioError::BufferUnderrun)));
        assert_eq!(log.lock().recovers, 1);
    }

    #[test]
    fn test_hard_error_is_returned() {
        let (mut sink, log) = sink();
        sink.reconfigure(&stereo_16()).unwrap();
        log.lock()
            .script
            .push_back(Err(AudioError::WriteFailed("gone".into())));

        assert!(sink.write(&[1u8; 8]).is_err());
        assert_eq!(log.lock().recovers, 0);
    }

    #[test]
    fn test_surround_plays_without_channel_map_support() {
        let (mut sink, log) = sink();
        log.lock().no_channel_map = true;
        let surround = ActiveFormat::from_header(FormatHeader::new(1, 16, 6, 0x003f));

        sink.reconfigure(&surround).unwrap();
        assert!(sink.is_open());
        sink.write(&[1u8; 24]).unwrap();

        let log = log.lock();
        assert_eq!(log.opens.len(), 1);
        assert_eq!(log.opens[0].channels, 6);
        assert_eq!(log.opens[0].roles.len(), 6);
        assert_eq!(log.opens[0].roles[0], ChannelRole::FrontLeft);
        assert_eq!(log.writes, vec![vec![1u8; 24]]);
        assert_eq!(sink.bytes_written(), 24);
    }
}
