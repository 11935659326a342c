/// Core traits for TSMF audio devices
use crate::error::Result;

/// Playback device capability set
///
/// The video redirection channel drives every audio sink through this trait,
/// so backends can be swapped behind the same facade. Operations are called
/// sequentially from one caller thread; implementations may block that
/// thread while waiting for their audio server.
///
/// # Lifecycle
///
/// ```text
/// open -> set_format -> play* / latency / flush -> (set_format -> play*)* -> free
/// ```
pub trait AudioDevice: Send {
    /// Connect to the audio server
    ///
    /// `device` selects a named output; `None` uses the server default.
    /// On failure nothing is left running.
    fn open(&mut self, device: Option<&str>) -> Result<()>;

    /// Configure the PCM format and open a playback stream for it
    ///
    /// Any previously open stream is drained and closed first.
    fn set_format(&mut self, sample_rate: u32, channels: u32, bits_per_sample: u32) -> Result<()>;

    /// Hand a buffer of interleaved PCM bytes to the stream
    ///
    /// Blocks until the whole buffer was accepted. The buffer is consumed
    /// whatever the outcome.
    fn play(&mut self, data: Vec<u8>) -> Result<()>;

    /// Current end-to-end latency in 100ns ticks
    ///
    /// Never blocks. Returns 0 when there is no stream or the server
    /// cannot report latency yet.
    fn latency(&self) -> u64;

    /// Discard audio queued in the server but not yet played
    ///
    /// A no-op when no stream is open.
    fn flush(&mut self) -> Result<()>;

    /// Tear down the stream, the event loop and the connection
    ///
    /// Idempotent; safe to call on a device that was never opened.
    fn free(&mut self);

    /// Backend name (e.g., "loopback", "cpal")
    fn name(&self) -> &'static str;
}
