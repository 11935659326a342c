//! Audio server playback device
//!
//! [`ServerAudioDevice`] ties the pieces together: a [`ConditionGate`] shared
//! with one [`EventLoop`] thread, the server connection, and at most one
//! playback stream. Every facade call runs on the caller's thread and blocks
//! on the gate until the event loop reports the outcome.
//!
//! [`ConditionGate`]: crate::gate::ConditionGate

use std::sync::Arc;
use tracing::{debug, info, warn};
use tsmf_core::{
    usec_to_ticks, AudioDevice, BufferAttr, DeviceConfig, DeviceError, Result, SampleFormat,
    SampleSpec, StreamFlags,
};

use crate::connection::{self, Connection};
use crate::event_loop::{DeviceGate, EventLoop};
use crate::server::{AudioServer, ContextState, StreamState};
use crate::stream::{self, Stream, StreamRequest};
use crate::writer::{self, WriteReport};

/// Playback device backed by an audio server client library
pub struct ServerAudioDevice {
    server: Arc<dyn AudioServer>,
    config: DeviceConfig,
    gate: Arc<DeviceGate>,
    event_loop: Option<EventLoop>,
    device_name: Option<String>,
    spec: Option<SampleSpec>,
    last_write: WriteReport,
}

impl ServerAudioDevice {
    /// Create a closed device
    ///
    /// # Errors
    ///
    /// Returns `DeviceError::Config` if `config` does not validate.
    pub fn new(server: Arc<dyn AudioServer>, config: DeviceConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            server,
            config,
            gate: Arc::new(DeviceGate::default()),
            event_loop: None,
            device_name: None,
            spec: None,
            last_write: WriteReport::default(),
        })
    }

    /// Whether `open` succeeded and `free` has not run since
    pub fn is_open(&self) -> bool {
        self.event_loop.is_some()
    }

    /// Format of the current stream
    pub fn sample_spec(&self) -> Option<SampleSpec> {
        self.spec
    }

    /// Output selected by `open`; `None` is the server default
    pub fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }

    /// Accounting of the most recent `play`
    pub fn last_write(&self) -> WriteReport {
        self.last_write
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn connection_state(&self) -> Option<ContextState> {
        self.gate.lock().connection.as_ref().map(Connection::state)
    }

    pub fn stream_state(&self) -> Option<StreamState> {
        self.gate.lock().stream.as_ref().map(Stream::state)
    }

    /// Resolve the requested bit depth against the configured policy
    fn check_bit_depth(&self, bits_per_sample: u32) -> Result<SampleFormat> {
        if let Some(format) = SampleFormat::from_bits(bits_per_sample) {
            return Ok(format);
        }
        if self.config.narrow_bit_depth {
            warn!(
                "Narrowing {}-bit audio to {}-bit",
                bits_per_sample,
                SampleFormat::S16Le.bits()
            );
            Ok(SampleFormat::S16Le)
        } else {
            Err(DeviceError::UnsupportedBitDepth(bits_per_sample))
        }
    }
}

impl AudioDevice for ServerAudioDevice {
    fn open(&mut self, device: Option<&str>) -> Result<()> {
        if self.is_open() {
            return Err(DeviceError::AlreadyOpen);
        }

        let device = device.filter(|name| !name.is_empty());
        debug!("Opening {} device {:?}", self.server.name(), device);

        let mut event_loop = EventLoop::new(&self.config.client_name);
        let context = self
            .server
            .new_context(&self.config.client_name, event_loop.sink())
            .map_err(|err| {
                warn!("Context creation failed (code {}): {}", err.code(), err);
                DeviceError::connection(err.to_string())
            })?;

        if let Err(err) =
            connection::connect(&self.gate, context, &mut event_loop, self.config.connect_timeout())
        {
            // Unwind fully: nothing may survive a failed open
            event_loop.stop();
            connection::release(&self.gate);
            return Err(err);
        }

        self.event_loop = Some(event_loop);
        self.device_name = device.map(str::to_string);
        info!(
            "Opened {} device (output: {})",
            self.server.name(),
            device.unwrap_or("default")
        );
        Ok(())
    }

    fn set_format(&mut self, sample_rate: u32, channels: u32, bits_per_sample: u32) -> Result<()> {
        if !self.is_open() {
            return Err(DeviceError::NotOpen);
        }

        self.check_bit_depth(bits_per_sample)?;
        let spec = SampleSpec::new(sample_rate, channels)?;

        let timeout = self.config.operation_timeout();
        if self.spec.take().is_some() {
            debug!("Replacing stream for new format {}", spec);
        }
        stream::close(&self.gate, timeout);

        let request = StreamRequest {
            name: &self.config.stream_name,
            device: self.device_name.as_deref(),
            spec,
            attr: BufferAttr::for_duration(
                &spec,
                self.config.max_length_ms,
                self.config.target_length_ms,
            ),
            flags: StreamFlags::playback(),
        };
        stream::open(&self.gate, &request, timeout)?;

        self.spec = Some(spec);
        Ok(())
    }

    fn play(&mut self, data: Vec<u8>) -> Result<()> {
        self.last_write = WriteReport::default();
        if !self.is_open() {
            return Err(DeviceError::NotOpen);
        }

        let (report, result) =
            writer::write_all(&self.gate, &data, self.config.operation_timeout());
        self.last_write = report;
        result
    }

    fn latency(&self) -> u64 {
        let guard = self.gate.lock();
        guard
            .stream
            .as_ref()
            .filter(|s| s.state() == StreamState::Ready)
            .map_or(0, |s| usec_to_ticks(s.latency_usec()))
    }

    fn flush(&mut self) -> Result<()> {
        if !self.is_open() {
            return Ok(());
        }
        stream::flush(&self.gate, self.config.operation_timeout())
    }

    fn free(&mut self) {
        let Some(mut event_loop) = self.event_loop.take() else {
            return;
        };

        stream::close(&self.gate, self.config.operation_timeout());
        event_loop.stop();
        connection::release(&self.gate);
        drop(event_loop);

        self.spec = None;
        self.device_name = None;
        info!("Freed {} device", self.server.name());
    }

    fn name(&self) -> &'static str {
        self.server.name()
    }
}

impl Drop for ServerAudioDevice {
    fn drop(&mut self) {
        self.free();
    }
}
