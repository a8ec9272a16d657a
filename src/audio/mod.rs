//! Audio subsystem module

pub mod buffer;
pub mod channel_map;
pub mod device;
pub mod format;
pub mod pcm;
pub mod resample;

pub use buffer::{RingBuffer, Sample, SharedRingBuffer};
pub use channel_map::{map_channels, ChannelRole};
pub use device::{find_output_device, list_output_devices};
pub use format::{ActiveFormat, FormatChangeEvent, FormatState};
pub use resample::Resampler;
