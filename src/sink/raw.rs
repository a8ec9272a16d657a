//! Raw PCM output
//!
//! Interleaved little-endian samples are written unchanged, typically to
//! stdout for piping into another player.

use std::io::{self, Write};
use tracing::info;

use crate::error::AudioError;
use crate::sink::blocking::{BlockingDevice, ChannelMapSupport, DeviceParams};

pub struct RawDevice<W: Write + Send> {
    out: W,
}

impl RawDevice<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> RawDevice<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> BlockingDevice for RawDevice<W> {
    fn open(&mut self, params: &DeviceParams) -> Result<ChannelMapSupport, AudioError> {
        info!(
            "Raw output now {} Hz, {} bit, {} channels",
            params.rate, params.sample_bits, params.channels
        );
        // The consumer only sees bytes, positions are its problem
        Ok(ChannelMapSupport::Unsupported)
    }

    fn write_frames(&mut self, data: &[u8]) -> Result<usize, AudioError> {
        loop {
            match self.out.write(data) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(AudioError::WriteFailed(e.to_string())),
            }
        }
    }

    fn recover(&mut self, _error: &AudioError) -> Result<(), AudioError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), AudioError> {
        self.out
            .flush()
            .map_err(|e| AudioError::WriteFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::ActiveFormat;
    use crate::protocol::FormatHeader;

    #[test]
    fn test_bytes_pass_through() {
        let mut device = RawDevice::new(Vec::new());
        let format = ActiveFormat::from_header(FormatHeader::new(1, 16, 2, 0x0003));
        let support = device.open(&DeviceParams::from_format(&format, 50)).unwrap();
        assert_eq!(support, ChannelMapSupport::Unsupported);

        assert_eq!(device.write_frames(&[1, 2, 3, 4]).unwrap(), 4);
        device.close().unwrap();
        assert_eq!(device.into_inner(), vec![1, 2, 3, 4]);
    }
}
