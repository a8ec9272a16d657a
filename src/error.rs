//! Error types for the receiver

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Errors the receiver cannot continue past. Everything else mutes the
    /// stream until the next format change.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Audio(e) => e.is_fatal(),
            Error::Network(e) => !matches!(e, NetworkError::InvalidPacket),
            Error::Config(_) | Error::Io(_) => true,
        }
    }
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Buffer underrun")]
    BufferUnderrun,

    #[error("Resampling failed: {0}")]
    ResampleFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("cpal error: {0}")]
    CpalError(String),
}

impl AudioError {
    /// Conditions a device can recover from in place (xrun style)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, AudioError::BufferUnderrun)
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, AudioError::ResourceExhausted(_))
    }
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Multicast join failed: {0}")]
    JoinFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Shared memory unavailable: {0}")]
    SharedMemory(String),

    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    #[error("Unknown interface: {0}")]
    UnknownInterface(String),

    #[error("Invalid packet format")]
    InvalidPacket,
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
