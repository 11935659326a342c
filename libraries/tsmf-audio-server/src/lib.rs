//! Audio server playback device for the video redirection channel
//!
//! This crate provides [`ServerAudioDevice`], an implementation of
//! [`tsmf_core::AudioDevice`] that plays PCM through a callback-driven audio
//! server. The server's client library sits behind the [`server`] traits; an
//! in-process [`LoopbackServer`] is always available and a CPAL-backed server
//! is compiled in with the `cpal` feature.
//!
//! # Features
//!
//! - One event-loop thread per device, the sole writer of connection and
//!   stream state
//! - Blocking facade calls coordinated through a condition gate, each wait
//!   bounded by the configured timeouts
//! - Backpressure-aware writes that never busy-wait
//! - Transactional `open`: a failed open leaves nothing running
//!
//! # Example
//!
//! ```no_run
//! use tsmf_audio_server::create_device;
//! use tsmf_core::{AudioDevice, DeviceConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut device = create_device(DeviceConfig::load(None)?)?;
//!
//! device.open(None)?;
//! device.set_format(44_100, 2, 16)?;
//! device.play(vec![0; 44_100 * 4])?;
//! println!("latency: {} ticks", device.latency());
//! device.flush()?;
//! device.free();
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod backend;
pub mod connection;
mod device;
mod error;
pub mod event_loop;
pub mod gate;
pub mod server;
pub mod servers;
pub mod stream;
pub mod writer;

pub use backend::{create_device, get_backend_info, list_available_backends, BackendInfo, ServerBackend};
pub use device::ServerAudioDevice;
pub use error::{BackendError, ServerError, ServerResult};
pub use servers::{LoopbackConfig, LoopbackServer, StreamRecord};
pub use writer::WriteReport;

#[cfg(feature = "cpal")]
pub use servers::CpalServer;
