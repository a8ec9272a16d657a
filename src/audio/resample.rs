//! Sample rate conversion for the callback path
//!
//! A realtime device runs on its own fixed clock, so the incoming stream is
//! decoded to float and converted to the device rate before it is queued.
//! Chunks arrive with arbitrary frame counts; input is accumulated per
//! channel and fed to rubato in fixed-size blocks.

use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};
use tracing::debug;

use crate::audio::pcm;
use crate::error::AudioError;

/// Input frames handed to rubato per block
const BLOCK_FRAMES: usize = 256;

/// Output frames needed for `src_frames` input frames, with one guard frame
pub fn estimate_output_frames(src_frames: usize, src_rate: u32, device_rate: u32) -> usize {
    if src_rate == 0 {
        return 0;
    }
    let num = src_frames as u64 * device_rate as u64;
    num.div_ceil(src_rate as u64) as usize + 1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SessionKey {
    source_rate: u32,
    device_rate: u32,
    channels: usize,
    bits: u8,
}

struct Session {
    key: SessionKey,
    /// `None` when rates match and only format conversion is needed
    engine: Option<FastFixedIn<f32>>,
    decoded: Vec<f32>,
    pending: Vec<Vec<f32>>,
    planar_out: Vec<Vec<f32>>,
    output: Vec<f32>,
}

/// Converts interleaved PCM bytes to interleaved float at the device rate
#[derive(Default)]
pub struct Resampler {
    session: Option<Session>,
}

impl Resampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind to a new stream format. A no-op when nothing changed.
    pub fn reconfigure(
        &mut self,
        source_rate: u32,
        device_rate: u32,
        channels: u8,
        bits: u8,
    ) -> Result<(), AudioError> {
        let key = SessionKey {
            source_rate,
            device_rate,
            channels: channels as usize,
            bits,
        };
        if self.session.as_ref().is_some_and(|s| s.key == key) {
            return Ok(());
        }
        self.session = None;

        if source_rate == 0 || device_rate == 0 || channels == 0 {
            return Err(AudioError::UnsupportedFormat(format!(
                "cannot resample {} Hz -> {} Hz with {} channels",
                source_rate, device_rate, channels
            )));
        }
        if !matches!(bits, 16 | 24 | 32) {
            return Err(AudioError::UnsupportedFormat(format!("{} bit samples", bits)));
        }

        let engine = if source_rate == device_rate {
            None
        } else {
            let ratio = device_rate as f64 / source_rate as f64;
            let engine = FastFixedIn::<f32>::new(
                ratio,
                1.0,
                PolynomialDegree::Cubic,
                BLOCK_FRAMES,
                key.channels,
            )
            .map_err(|e| AudioError::ResampleFailed(e.to_string()))?;
            Some(engine)
        };

        let out_frames = engine
            .as_ref()
            .map(|e| e.output_frames_max())
            .unwrap_or(0);

        debug!(
            "Resampler session {} Hz -> {} Hz, {} channels, {} bit",
            source_rate, device_rate, channels, bits
        );

        self.session = Some(Session {
            key,
            engine,
            decoded: Vec::new(),
            pending: vec![Vec::with_capacity(BLOCK_FRAMES * 2); key.channels],
            planar_out: vec![vec![0.0; out_frames]; key.channels],
            output: Vec::new(),
        });
        Ok(())
    }

    /// Convert one chunk. Returns the interleaved device-rate samples
    /// produced so far; a partial block stays queued for the next call.
    pub fn process(&mut self, input: &[u8]) -> Result<&[f32], AudioError> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| AudioError::ResampleFailed("resampler not configured".into()))?;
        let channels = session.key.channels;
        let frame_bytes = channels * session.key.bits as usize / 8;
        let usable = input.len() - input.len() % frame_bytes;

        session.decoded.clear();
        pcm::decode_le(&input[..usable], session.key.bits, &mut session.decoded);

        let Some(engine) = session.engine.as_mut() else {
            return Ok(&session.decoded);
        };

        let frames = session.decoded.len() / channels;
        session.output.clear();
        session.output.reserve(
            estimate_output_frames(frames, session.key.source_rate, session.key.device_rate)
                * channels,
        );

        for frame in session.decoded.chunks_exact(channels) {
            for (ch, sample) in frame.iter().enumerate() {
                session.pending[ch].push(*sample);
            }
        }

        loop {
            let needed = engine.input_frames_next();
            if session.pending[0].len() < needed {
                break;
            }
            let (consumed, produced) = {
                let block: Vec<&[f32]> = session.pending.iter().map(|c| &c[..needed]).collect();
                engine
                    .process_into_buffer(&block, session.planar_out.as_mut_slice(), None)
                    .map_err(|e| AudioError::ResampleFailed(e.to_string()))?
            };

            for i in 0..produced {
                for ch in 0..channels {
                    session.output.push(session.planar_out[ch][i]);
                }
            }
            for channel in session.pending.iter_mut() {
                channel.drain(..consumed);
            }
        }

        Ok(&session.output)
    }

    /// Drop the session
    pub fn reset(&mut self) {
        self.session = None;
    }

    pub fn is_configured(&self) -> bool {
        self.session.is_some()
    }

    /// True when a rate conversion (not just format conversion) is active
    pub fn is_converting(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.engine.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pcm::encode_i16_le;

    #[test]
    fn test_estimate_output_frames() {
        assert_eq!(estimate_output_frames(441, 44_100, 48_000), 481);
        assert_eq!(estimate_output_frames(480, 48_000, 48_000), 481);
        assert_eq!(estimate_output_frames(1, 48_000, 44_100), 2);
        assert_eq!(estimate_output_frames(10, 0, 48_000), 0);
    }

    #[test]
    fn test_same_rate_passthrough() {
        let mut resampler = Resampler::new();
        resampler.reconfigure(48_000, 48_000, 2, 16).unwrap();
        assert!(!resampler.is_converting());

        let bytes = encode_i16_le(&[0.5, -0.5, 0.25, -0.25]);
        let out = resampler.process(&bytes).unwrap();
        assert_eq!(out.len(), 4);
        assert!((out[0] - 0.5).abs() < 1e-3);
        assert!((out[3] + 0.25).abs() < 1e-3);
    }

    #[test]
    fn test_rejects_unsupported() {
        let mut resampler = Resampler::new();
        assert!(resampler.reconfigure(0, 48_000, 2, 16).is_err());
        assert!(resampler.reconfigure(44_100, 48_000, 2, 20).is_err());
        assert!(!resampler.is_configured());
        assert!(resampler.process(&[0, 0]).is_err());
    }

    #[test]
    fn test_upsample_length() {
        let mut resampler = Resampler::new();
        resampler.reconfigure(44_100, 48_000, 2, 16).unwrap();
        assert!(resampler.is_converting());

        // One second of stereo silence in 1152 byte chunks
        let chunk = vec![0u8; 1152];
        let mut total = 0usize;
        for _ in 0..(44_100 * 4 / 1152) {
            total += resampler.process(&chunk).unwrap().len();
        }
        let in_frames = (44_100 * 4 / 1152) * 1152 / 4;
        let expected = in_frames * 48_000 / 44_100;
        let produced = total / 2;
        assert!(
            produced.abs_diff(expected) <= 2 * BLOCK_FRAMES,
            "expected ~{expected} frames, got {produced}"
        );
    }

    #[test]
    fn test_reconfigure_same_key_keeps_session() {
        let mut resampler = Resampler::new();
        resampler.reconfigure(44_100, 48_000, 2, 16).unwrap();
        // Queue a partial block
        resampler.process(&[0u8; 40]).unwrap();
        resampler.reconfigure(44_100, 48_000, 2, 16).unwrap();
        assert!(resampler.is_converting());
        resampler.reconfigure(48_000, 48_000, 2, 16).unwrap();
        assert!(!resampler.is_converting());
    }

    #[test]
    fn test_channel_or_width_change_rebuilds_session() {
        let mut resampler = Resampler::new();
        resampler.reconfigure(44_100, 48_000, 2, 16).unwrap();
        // 200 stereo frames stay queued below one block
        assert!(resampler.process(&vec![0u8; 200 * 4]).unwrap().is_empty());

        // Same rates, one channel: the queued stereo frames are dropped
        resampler.reconfigure(44_100, 48_000, 1, 16).unwrap();
        assert!(resampler.process(&vec![0u8; 200 * 2]).unwrap().is_empty());

        // Same rates and channels, wider samples
        resampler.reconfigure(44_100, 48_000, 1, 24).unwrap();
        assert!(resampler.process(&vec![0u8; 200 * 3]).unwrap().is_empty());

        // Unchanged key: the queue carries over and completes a block
        resampler.reconfigure(44_100, 48_000, 1, 24).unwrap();
        assert!(!resampler.process(&vec![0u8; 100 * 3]).unwrap().is_empty());
    }

    #[test]
    fn test_width_change_decodes_new_width() {
        let mut resampler = Resampler::new();
        resampler.reconfigure(48_000, 48_000, 2, 16).unwrap();
        resampler.reconfigure(48_000, 48_000, 2, 24).unwrap();

        let out = resampler.process(&[0, 0, 0x40, 0, 0, 0xC0]).unwrap();
        assert_eq!(out.len(), 2);
        assert!((out[0] - 0.5).abs() < 1e-3);
        assert!((out[1] + 0.5).abs() < 1e-3);
    }
}
