//! # PCM Stream Receiver
//!
//! Plays a self-describing PCM stream whose sender may switch sample rate,
//! sample size, channel count and channel layout between any two chunks.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                           TRANSPORTS (transport)                          │
//! │  ┌────────────────┐   ┌──────────────────────┐   ┌──────────────────┐    │
//! │  │ UDP unicast /  │   │ Shared memory ring   │   │ Packet capture   │    │
//! │  │ multicast      │   │ (inter-VM, polled)   │   │ (Eth/IPv4/UDP)   │    │
//! │  └───────┬────────┘   └──────────┬───────────┘   └────────┬─────────┘    │
//! │          └───────────────────────┼────────────────────────┘              │
//! │                                  ▼  Chunk { FormatHeader, &[u8] }         │
//! └──────────────────────────────────┼───────────────────────────────────────┘
//!                                    ▼
//! ┌──────────────────────────────────┼───────────────────────────────────────┐
//! │                        RECEIVER LOOP (receiver)                           │
//! │     FormatState ──change──► ChannelMapper ──► PlaybackSink::reconfigure   │
//! │                                  │                                        │
//! │                                  ▼  PlaybackSink::write                   │
//! └──────────────────────────────────┼───────────────────────────────────────┘
//!                   ┌────────────────┴──────────────────┐
//!                   ▼                                   ▼
//! ┌──────────────────────────────────┐ ┌──────────────────────────────────────┐
//! │ BlockingSink                     │ │ CallbackSink                         │
//! │  device reopened per format,     │ │  Resampler ─► RingBuffer (SPSC)      │
//! │  blocking writes                 │ │               │                      │
//! │  (raw stdout / cpal device)      │ │               ▼ realtime thread      │
//! │                                  │ │  RealtimeConsumer::pull ─► device    │
//! └──────────────────────────────────┘ └──────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod protocol;
pub mod receiver;
pub mod sink;
pub mod transport;

pub use error::{Error, Result};

/// Application-wide defaults
pub mod constants {
    use std::net::Ipv4Addr;

    /// Default UDP port of the stream
    pub const DEFAULT_PORT: u16 = 4010;

    /// Default multicast group
    pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 77, 77);

    /// Default buffering between stream and device
    pub const DEFAULT_LATENCY_MS: u32 = 50;

    /// Default sleep between shared-memory polls
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10;

    /// Default time a transport waits before reporting idle
    pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 100;
}
