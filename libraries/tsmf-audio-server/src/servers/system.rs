/// System audio server on top of CPAL
///
/// Each stream owns a dedicated audio thread holding the CPAL `Stream`
/// (which is not `Send` on every platform). Written PCM goes through a
/// lock-free byte ring; the output callback drains it, converts to the
/// device sample type and posts write requests as room frees up.
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, FromSample, HostId, SampleFormat, SizedSample, Stream, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};
use tsmf_core::{BufferAttr, SampleSpec, StreamFlags};

use crate::error::{ServerError, ServerResult};
use crate::server::{
    AudioServer, ContextState, EventSink, OperationId, SeekMode, ServerContext, ServerEvent,
    ServerStream, StreamId, StreamState,
};

/// No operation pending
const NO_OPERATION: u64 = 0;

/// CPAL-backed audio server for one host (ALSA, WASAPI, CoreAudio, JACK...)
#[derive(Debug, Clone, Copy)]
pub struct CpalServer {
    host: HostId,
}

impl CpalServer {
    /// Server on the platform default host
    pub fn new() -> Self {
        Self {
            host: cpal::default_host().id(),
        }
    }

    /// Server on a specific host
    pub fn with_host(host: HostId) -> Self {
        Self { host }
    }

    /// Names of the host's output devices
    pub fn list_devices(&self) -> ServerResult<Vec<String>> {
        let host = cpal::host_from_id(self.host).map_err(|_| ServerError::ConnectionRefused)?;
        let devices = host
            .output_devices()
            .map_err(|e| ServerError::Io(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();
        Ok(devices)
    }
}

impl Default for CpalServer {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioServer for CpalServer {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn new_context(
        &self,
        client_name: &str,
        events: EventSink,
    ) -> ServerResult<Box<dyn ServerContext>> {
        debug!("New CPAL context for '{}' on {:?}", client_name, self.host);
        Ok(Box::new(CpalContext {
            host: self.host,
            events,
            state: ContextState::Unconnected,
            next_stream: Arc::new(AtomicU32::new(0)),
            next_operation: Arc::new(AtomicU64::new(NO_OPERATION)),
        }))
    }
}

struct CpalContext {
    host: HostId,
    events: EventSink,
    state: ContextState,
    next_stream: Arc<AtomicU32>,
    next_operation: Arc<AtomicU64>,
}

impl ServerContext for CpalContext {
    fn connect(&mut self) -> ServerResult<()> {
        if self.state != ContextState::Unconnected {
            return Err(ServerError::BadState);
        }
        self.events
            .post(ServerEvent::ContextStateChanged(ContextState::Connecting));

        self.state = match cpal::host_from_id(self.host) {
            Ok(_) => ContextState::Ready,
            Err(err) => {
                warn!("CPAL host {:?} unavailable: {}", self.host, err);
                ContextState::Failed
            }
        };
        self.events.post(ServerEvent::ContextStateChanged(self.state));
        Ok(())
    }

    fn new_stream(&mut self, name: &str, spec: &SampleSpec) -> ServerResult<Box<dyn ServerStream>> {
        if self.state != ContextState::Ready {
            return Err(ServerError::BadState);
        }
        let id = self.next_stream.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("New CPAL stream {} '{}' ({})", id, name, spec);

        Ok(Box::new(CpalStream {
            host: self.host,
            id,
            spec: *spec,
            events: self.events.clone(),
            next_operation: Arc::clone(&self.next_operation),
            shared: Arc::new(Shared::default()),
            producer: None,
            target_length: 0,
            state: StreamState::Unconnected,
            thread: None,
        }))
    }

    fn disconnect(&mut self) {
        if self.state == ContextState::Terminated {
            return;
        }
        self.state = ContextState::Terminated;
        self.events
            .post(ServerEvent::ContextStateChanged(ContextState::Terminated));
    }
}

/// State shared with the output callback
#[derive(Default)]
struct Shared {
    /// Pending flush operation id
    flush: AtomicU64,
    /// Pending drain operation id
    drain: AtomicU64,
    failed: AtomicBool,
}

/// Commands sent to the stream's audio thread
enum AudioCommand {
    /// Drop the CPAL stream and exit
    Shutdown,
}

struct AudioThread {
    command_tx: Sender<AudioCommand>,
    handle: JoinHandle<()>,
}

struct CpalStream {
    host: HostId,
    id: StreamId,
    spec: SampleSpec,
    events: EventSink,
    next_operation: Arc<AtomicU64>,
    shared: Arc<Shared>,
    producer: Option<HeapProd<u8>>,
    target_length: usize,
    state: StreamState,
    thread: Option<AudioThread>,
}

impl CpalStream {
    fn post_state(&self, state: StreamState) {
        self.events.post(ServerEvent::StreamStateChanged {
            stream: self.id,
            state,
        });
    }

    fn queued(&self) -> usize {
        self.producer.as_ref().map_or(0, |producer| producer.occupied_len())
    }

    fn check_ready(&self) -> ServerResult<()> {
        if self.state == StreamState::Ready && !self.shared.failed.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(ServerError::BadState)
        }
    }

    fn next_operation(&self) -> OperationId {
        OperationId(self.next_operation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn stop_thread(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.command_tx.send(AudioCommand::Shutdown);
            if thread.handle.join().is_err() {
                error!("Audio thread for stream {} panicked", self.id);
            }
        }
    }
}

/// Everything the output callback owns
struct CallbackState {
    consumer: HeapCons<u8>,
    shared: Arc<Shared>,
    events: EventSink,
    stream: StreamId,
    target_length: usize,
    /// Bytes per interleaved frame
    frame_bytes: usize,
}

impl CallbackState {
    /// Next little-endian 16-bit sample; callers check a whole frame is queued
    fn next_sample(&mut self) -> i16 {
        let mut bytes = [0u8; 2];
        if self.consumer.pop_slice(&mut bytes) == 2 {
            i16::from_le_bytes(bytes)
        } else {
            0
        }
    }

    fn fill<T>(&mut self, output: &mut [T])
    where
        T: SizedSample + FromSample<i16>,
    {
        let flush = self.shared.flush.swap(NO_OPERATION, Ordering::AcqRel);
        if flush != NO_OPERATION {
            self.consumer.clear();
            self.complete(flush, true);
        }

        // Partial frames stay queued until the rest of their bytes arrive
        let channels = (self.frame_bytes / 2).max(1);
        let before = self.consumer.occupied_len();
        for frame in output.chunks_mut(channels) {
            let whole = self.consumer.occupied_len() >= self.frame_bytes;
            for sample in frame.iter_mut() {
                let value = if whole { self.next_sample() } else { 0 };
                *sample = T::from_sample_(value);
            }
        }
        let queued = self.consumer.occupied_len();

        if queued < self.frame_bytes {
            let drain = self.shared.drain.swap(NO_OPERATION, Ordering::AcqRel);
            if drain != NO_OPERATION {
                self.complete(drain, true);
            }
        }

        if queued < before && queued < self.target_length {
            self.events.post(ServerEvent::WriteRequested {
                stream: self.stream,
                bytes: self.target_length - queued,
            });
        }
    }

    fn complete(&self, operation: u64, success: bool) {
        self.events.post(ServerEvent::OperationCompleted {
            operation: OperationId(operation),
            success,
        });
    }
}

fn find_device(host: HostId, name: Option<&str>) -> ServerResult<Device> {
    let host = cpal::host_from_id(host).map_err(|_| ServerError::ConnectionRefused)?;
    match name {
        None => host
            .default_output_device()
            .ok_or_else(|| ServerError::NoEntity("default output".into())),
        Some(name) => host
            .output_devices()
            .map_err(|e| ServerError::Io(e.to_string()))?
            .find(|device| device.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| ServerError::NoEntity(name.to_string())),
    }
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut state: CallbackState,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<i16>,
{
    let shared = Arc::clone(&state.shared);
    let events = state.events.clone();
    let stream = state.stream;
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| state.fill(data),
        move |err| {
            error!("Audio stream {} error: {}", stream, err);
            if !shared.failed.swap(true, Ordering::AcqRel) {
                events.post(ServerEvent::StreamStateChanged {
                    stream,
                    state: StreamState::Failed,
                });
            }
        },
        None,
    )
}

/// Audio thread body: open the device, play, then park until shutdown
fn audio_thread_run(
    host: HostId,
    device_name: Option<String>,
    spec: SampleSpec,
    state: CallbackState,
    command_rx: Receiver<AudioCommand>,
    ready_tx: Sender<ServerResult<()>>,
) {
    let opened = find_device(host, device_name.as_deref()).and_then(|device| {
        let format = device
            .default_output_config()
            .map_err(|e| ServerError::Io(e.to_string()))?
            .sample_format();
        let config = StreamConfig {
            channels: u16::from(spec.channels),
            sample_rate: spec.rate.as_hz(),
            buffer_size: BufferSize::Default,
        };

        let stream = match format {
            SampleFormat::I16 => build_stream::<i16>(&device, &config, state),
            SampleFormat::F32 => build_stream::<f32>(&device, &config, state),
            other => {
                return Err(ServerError::NotSupported(format!(
                    "device sample format {:?}",
                    other
                )))
            }
        }
        .map_err(|e| ServerError::Io(format!("Failed to build stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| ServerError::Io(format!("Failed to start stream: {}", e)))?;
        Ok(stream)
    });

    let stream = match opened {
        Ok(stream) => {
            let _ = ready_tx.send(Ok(()));
            stream
        }
        Err(err) => {
            let _ = ready_tx.send(Err(err));
            return;
        }
    };

    while let Ok(command) = command_rx.recv() {
        match command {
            AudioCommand::Shutdown => break,
        }
    }
    drop(stream);
}

impl ServerStream for CpalStream {
    fn id(&self) -> StreamId {
        self.id
    }

    fn connect_playback(
        &mut self,
        device: Option<&str>,
        attr: &BufferAttr,
        flags: StreamFlags,
    ) -> ServerResult<()> {
        if self.state != StreamState::Unconnected {
            return Err(ServerError::BadState);
        }
        if attr.target_length == 0 || attr.target_length > attr.max_length {
            return Err(ServerError::InvalidArgument(format!(
                "target length {} with max length {}",
                attr.target_length, attr.max_length
            )));
        }
        debug!("Connecting CPAL stream {} with {:?}", self.id, flags);

        self.state = StreamState::Connecting;
        self.post_state(StreamState::Connecting);

        let (producer, consumer) = HeapRb::<u8>::new(attr.max_length as usize).split();
        self.target_length = attr.target_length as usize;

        let callback = CallbackState {
            consumer,
            shared: Arc::clone(&self.shared),
            events: self.events.clone(),
            stream: self.id,
            target_length: self.target_length,
            frame_bytes: self.spec.frame_size(),
        };
        let (command_tx, command_rx) = bounded::<AudioCommand>(4);
        let (ready_tx, ready_rx) = bounded::<ServerResult<()>>(1);
        let host = self.host;
        let spec = self.spec;
        let device_name = device.map(str::to_string);

        let handle = thread::Builder::new()
            .name(format!("cpal-stream-{}", self.id))
            .spawn(move || {
                audio_thread_run(host, device_name, spec, callback, command_rx, ready_tx);
            })
            .map_err(|e| ServerError::Io(e.to_string()))?;
        self.thread = Some(AudioThread { command_tx, handle });

        // Device setup is synchronous; the outcome is still reported as an event
        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.producer = Some(producer);
                self.state = StreamState::Ready;
                info!(
                    "CPAL stream {} playing on {}",
                    self.id,
                    device.unwrap_or("default output")
                );
                self.post_state(StreamState::Ready);
                self.events.post(ServerEvent::WriteRequested {
                    stream: self.id,
                    bytes: self.target_length,
                });
            }
            Ok(Err(err)) => {
                warn!("CPAL stream {} failed (code {}): {}", self.id, err.code(), err);
                self.stop_thread();
                self.state = StreamState::Failed;
                self.post_state(StreamState::Failed);
            }
            Err(_) => {
                self.stop_thread();
                self.state = StreamState::Failed;
                self.post_state(StreamState::Failed);
            }
        }
        Ok(())
    }

    fn writable_size(&self) -> ServerResult<usize> {
        self.check_ready()?;
        Ok(self.target_length.saturating_sub(self.queued()))
    }

    fn write(&mut self, data: &[u8], offset: i64, seek: SeekMode) -> ServerResult<()> {
        if seek != SeekMode::Relative || offset != 0 {
            return Err(ServerError::NotSupported(format!(
                "seek {:?} with offset {}",
                seek, offset
            )));
        }
        self.check_ready()?;

        let producer = self.producer.as_mut().ok_or(ServerError::BadState)?;
        if producer.vacant_len() < data.len() {
            return Err(ServerError::TooLarge(data.len()));
        }
        let pushed = producer.push_slice(data);
        if pushed < data.len() {
            return Err(ServerError::TooLarge(data.len()));
        }
        Ok(())
    }

    fn latency(&self) -> ServerResult<u64> {
        self.check_ready().map_err(|_| ServerError::NoData)?;
        Ok(self.spec.bytes_to_usec(self.queued() as u64))
    }

    fn flush(&mut self) -> ServerResult<OperationId> {
        self.check_ready()?;
        let operation = self.next_operation();
        self.shared.flush.store(operation.0, Ordering::Release);
        Ok(operation)
    }

    fn drain(&mut self) -> ServerResult<OperationId> {
        self.check_ready()?;
        let operation = self.next_operation();
        self.shared.drain.store(operation.0, Ordering::Release);
        Ok(operation)
    }

    fn disconnect(&mut self) {
        self.stop_thread();
        self.producer = None;

        if self.state == StreamState::Terminated {
            return;
        }
        self.state = StreamState::Terminated;

        for pending in [&self.shared.flush, &self.shared.drain] {
            let operation = pending.swap(NO_OPERATION, Ordering::AcqRel);
            if operation != NO_OPERATION {
                self.events.post(ServerEvent::OperationCompleted {
                    operation: OperationId(operation),
                    success: false,
                });
            }
        }
        self.post_state(StreamState::Terminated);
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.stop_thread();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::LoopMessage;

    fn callback(capacity: usize, channels: u32) -> (HeapProd<u8>, CallbackState) {
        let (producer, consumer) = HeapRb::<u8>::new(capacity).split();
        let (tx, _rx) = crossbeam_channel::unbounded::<LoopMessage>();
        let spec = SampleSpec::new(48_000, channels).unwrap();
        let state = CallbackState {
            consumer,
            shared: Arc::new(Shared::default()),
            events: EventSink::new(tx),
            stream: 1,
            target_length: capacity,
            frame_bytes: spec.frame_size(),
        };
        (producer, state)
    }

    #[test]
    fn odd_trailing_byte_is_held_back() {
        let (mut producer, mut state) = callback(64, 1);
        producer.push_slice(&[0x01, 0x00, 0x02]);

        let mut output = [7i16; 3];
        state.fill(&mut output);
        assert_eq!(output, [1, 0, 0]);
        assert_eq!(state.consumer.occupied_len(), 1);

        // The held byte pairs with the next write
        producer.push_slice(&[0x00]);
        state.fill(&mut output);
        assert_eq!(output, [2, 0, 0]);
        assert_eq!(state.consumer.occupied_len(), 0);
    }

    #[test]
    fn partial_frame_keeps_channels_aligned() {
        let (mut producer, mut state) = callback(64, 2);
        // One full stereo frame plus the left sample of the next
        producer.push_slice(&[0x01, 0x00, 0x02, 0x00, 0x03, 0x00]);

        let mut output = [0f32; 4];
        state.fill(&mut output);
        assert!(output[0] > 0.0 && output[1] > 0.0);
        assert!(output[2..].iter().all(|&sample| sample == 0.0));
        assert_eq!(state.consumer.occupied_len(), 2);

        producer.push_slice(&[0x04, 0x00]);
        let mut output = [0i16; 2];
        state.fill(&mut output);
        assert_eq!(output, [3, 4]);
    }
}
