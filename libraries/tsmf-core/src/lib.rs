//! TSMF Audio Core
//!
//! Platform-agnostic types, traits, and error handling for the audio sinks of
//! the video redirection channel.
//!
//! # Architecture
//!
//! The core crate defines:
//! - **Capability set**: the `AudioDevice` trait every playback backend implements
//! - **Audio types**: `SampleSpec`, `BufferAttr`, `StreamFlags`, latency ticks
//! - **Error Handling**: Unified `DeviceError` and `Result` types
//! - **Configuration**: `DeviceConfig`, loaded from TOML and the environment
//!
//! # Example
//!
//! ```rust
//! use tsmf_core::{BufferAttr, SampleSpec};
//!
//! let spec = SampleSpec::new(44_100, 2).unwrap();
//! let attr = BufferAttr::for_duration(&spec, 500, 250);
//! assert_eq!(attr.target_length, 44_100);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use config::DeviceConfig;
pub use error::{DeviceError, Result};
pub use traits::AudioDevice;
pub use types::{
    usec_to_ticks, BufferAttr, SampleFormat, SampleRate, SampleSpec, StreamFlags, MAX_CHANNELS,
    MAX_SAMPLE_RATE, TICKS_PER_USEC,
};
