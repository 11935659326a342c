/// Core error types for TSMF audio devices
use thiserror::Error;

/// Result type alias using `DeviceError`
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Error reported by an [`AudioDevice`](crate::AudioDevice) operation
///
/// Server error codes are logged where they occur; only a short reason
/// string travels with the error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// Server unreachable, or the connection failed/terminated while opening
    #[error("Connection error: {reason}")]
    Connection { reason: String },

    /// Stream failed/terminated while opening, or a stream operation failed
    #[error("Stream error: {reason}")]
    Stream { reason: String },

    /// A write failed part-way through a buffer
    ///
    /// The first `written` bytes reached the server; the remaining
    /// `dropped` bytes were discarded.
    #[error("Write aborted after {written} bytes ({dropped} dropped): {reason}")]
    WriteAbort {
        written: usize,
        dropped: usize,
        reason: String,
    },

    /// A bounded wait expired before the server answered
    #[error("Timed out waiting for {operation}")]
    Timeout { operation: &'static str },

    /// The device has not been opened
    #[error("Device is not open")]
    NotOpen,

    /// `open` was called on a device that is already open
    #[error("Device is already open")]
    AlreadyOpen,

    /// No stream has been configured with `set_format`
    #[error("No stream is open")]
    StreamNotOpen,

    /// Sample rate or channel count out of range
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Bit depth other than 16 requested without narrowing enabled
    #[error("Unsupported bit depth: {0} (only 16-bit PCM is supported)")]
    UnsupportedBitDepth(u32),

    /// The event loop thread could not be started or reached
    #[error("Event loop error: {0}")]
    EventLoop(String),

    /// Invalid device configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DeviceError {
    /// Create a connection error
    pub fn connection(reason: impl Into<String>) -> Self {
        Self::Connection {
            reason: reason.into(),
        }
    }

    /// Create a stream error
    pub fn stream(reason: impl Into<String>) -> Self {
        Self::Stream {
            reason: reason.into(),
        }
    }

    /// Create a write-abort error
    pub fn write_abort(written: usize, dropped: usize, reason: impl Into<String>) -> Self {
        Self::WriteAbort {
            written,
            dropped,
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True for errors caused by a wait deadline
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<config::ConfigError> for DeviceError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
