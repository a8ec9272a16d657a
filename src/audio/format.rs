//! Active stream format tracking
//!
//! The sender may switch rate, depth or layout between any two chunks. The
//! receiver keeps the last header it applied and reports a change whenever a
//! new header differs from it in any field.

use tracing::{debug, info, warn};

use crate::audio::channel_map::{map_channels, ChannelRole};
use crate::protocol::FormatHeader;

/// Snapshot of the applied format plus everything derived from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveFormat {
    pub header: FormatHeader,
    /// Sample rate in Hz, 0 when the stream is unplayable
    pub rate: u32,
    /// 0 when the sample size is unsupported
    pub bytes_per_sample: u8,
    pub roles: Vec<ChannelRole>,
}

impl ActiveFormat {
    pub fn from_header(header: FormatHeader) -> Self {
        let bytes_per_sample = header.bytes_per_sample().unwrap_or(0);
        let rate = if bytes_per_sample == 0 { 0 } else { header.sample_rate() };
        Self {
            header,
            rate,
            bytes_per_sample,
            roles: map_channels(header.channels, header.channel_mask),
        }
    }

    pub fn is_playable(&self) -> bool {
        self.rate > 0 && self.bytes_per_sample > 0 && self.header.channels > 0
    }

    pub fn channels(&self) -> u8 {
        self.header.channels
    }

    pub fn sample_bits(&self) -> u8 {
        self.header.sample_size_bits
    }

    /// Bytes in one interleaved frame
    pub fn frame_bytes(&self) -> usize {
        self.bytes_per_sample as usize * self.header.channels as usize
    }
}

/// Emitted when an incoming header differs from the active one
#[derive(Debug, Clone)]
pub struct FormatChangeEvent {
    pub previous: Option<FormatHeader>,
    pub format: ActiveFormat,
}

/// Tracks the currently applied format
#[derive(Debug, Default)]
pub struct FormatState {
    active: Option<ActiveFormat>,
}

impl FormatState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare `header` against the active format and report a change
    pub fn update(&mut self, header: FormatHeader) -> Option<FormatChangeEvent> {
        if self.active.as_ref().is_some_and(|a| a.header == header) {
            return None;
        }

        let previous = self.active.as_ref().map(|a| a.header);
        let format = ActiveFormat::from_header(header);

        if format.is_playable() {
            info!(
                "Switched format to sample rate {}, sample size {} and {} channels",
                format.rate, header.sample_size_bits, header.channels
            );
            for (i, role) in format.roles.iter().enumerate() {
                debug!("Channel {} mapped to {}", i, role);
            }
        } else {
            warn!(
                "Unsupported format (rate code {}, sample size {}, {} channels), not playing until next format switch",
                header.sample_rate_code, header.sample_size_bits, header.channels
            );
        }

        self.active = Some(format.clone());
        Some(FormatChangeEvent { previous, format })
    }

    pub fn active(&self) -> Option<&ActiveFormat> {
        self.active.as_ref()
    }

    /// True when a format was recorded but cannot be played
    pub fn is_muted(&self) -> bool {
        self.active.as_ref().is_some_and(|a| !a.is_playable())
    }

    pub fn reset(&mut self) {
        self.active = None;
    }
}
