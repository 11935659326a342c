//! Playback stream management
//!
//! Opening, closing and flushing a stream all follow the same shape: issue
//! the request under the gate, then wait on the gate until the event loop
//! reports the outcome or the deadline passes.

use std::sync::MutexGuard;
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use tsmf_core::{BufferAttr, DeviceError, Result, SampleSpec, StreamFlags};

use crate::event_loop::{DeviceGate, DeviceState};
use crate::gate::{deadline_after, WaitOutcome};
use crate::server::{OperationId, OperationState, ServerStream, StreamId, StreamState};

/// Playback stream owned by the device
///
/// State fields are written by the event loop thread only.
pub struct Stream {
    pub(crate) handle: Box<dyn ServerStream>,
    id: StreamId,
    spec: SampleSpec,
    state: StreamState,
    write_handler: bool,
    write_requests: u64,
}

impl Stream {
    pub fn new(handle: Box<dyn ServerStream>, spec: SampleSpec) -> Self {
        let id = handle.id();
        Self {
            handle,
            id,
            spec,
            state: StreamState::Unconnected,
            write_handler: true,
            write_requests: 0,
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn spec(&self) -> SampleSpec {
        self.spec
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Write-request callbacks received so far
    pub fn write_requests(&self) -> u64 {
        self.write_requests
    }

    pub(crate) fn on_state_change(&mut self, state: StreamState) {
        debug!("Stream {} state: {:?} -> {:?}", self.id, self.state, state);
        self.state = state;
    }

    pub(crate) fn on_write_request(&mut self, bytes: usize) {
        if !self.write_handler {
            return;
        }
        trace!("Stream {} requests {} bytes", self.id, bytes);
        self.write_requests += 1;
    }

    /// Stop counting write requests; used before draining a closing stream
    pub(crate) fn clear_write_handler(&mut self) {
        self.write_handler = false;
    }

    /// Current latency in microseconds, 0 when unavailable
    pub fn latency_usec(&self) -> u64 {
        match self.handle.latency() {
            Ok(usec) => usec,
            Err(err) => {
                trace!("Latency unavailable (code {}): {}", err.code(), err);
                0
            }
        }
    }
}

/// Parameters for a new playback stream
#[derive(Debug, Clone)]
pub struct StreamRequest<'a> {
    pub name: &'a str,
    pub device: Option<&'a str>,
    pub spec: SampleSpec,
    pub attr: BufferAttr,
    pub flags: StreamFlags,
}

/// Create and connect a playback stream, blocking until it settles
///
/// Requires a ready connection and no current stream.
pub fn open(gate: &DeviceGate, request: &StreamRequest<'_>, timeout: Option<Duration>) -> Result<()> {
    let mut guard = gate.lock();
    if guard.stream.is_some() {
        return Err(DeviceError::stream("a stream is already open"));
    }

    let connection = guard.connection.as_mut().ok_or(DeviceError::NotOpen)?;
    let mut handle = connection
        .handle
        .new_stream(request.name, &request.spec)
        .map_err(|err| {
            warn!("Stream creation failed (code {}): {}", err.code(), err);
            DeviceError::stream(err.to_string())
        })?;

    if let Err(err) = handle.connect_playback(request.device, &request.attr, request.flags) {
        warn!("Stream connect failed (code {}): {}", err.code(), err);
        handle.disconnect();
        return Err(DeviceError::stream(err.to_string()));
    }

    let id = handle.id();
    guard.stream = Some(Stream::new(handle, request.spec));

    let (mut guard, outcome) = gate.wait_while(guard, deadline_after(timeout), |state| {
        state
            .stream
            .as_ref()
            .is_some_and(|s| s.id() == id && !s.state().is_settled())
    });

    let state = guard
        .stream
        .as_ref()
        .map_or(StreamState::Terminated, Stream::state);

    if state == StreamState::Ready {
        info!(
            "Stream {} ready ({}, device: {})",
            id,
            request.spec,
            request.device.unwrap_or("default")
        );
        return Ok(());
    }

    if let Some(mut stream) = take_stream(&mut guard) {
        stream.handle.disconnect();
    }

    if outcome.timed_out() {
        warn!("Timed out waiting for stream {}", id);
        Err(DeviceError::Timeout { operation: "stream" })
    } else {
        warn!("Stream {} ended in state {:?}", id, state);
        Err(DeviceError::stream(format!("stream ended in state {:?}", state)))
    }
}

/// Drain (if ready) and disconnect the current stream
///
/// Never fails: a drain that fails or times out is logged and the stream is
/// disconnected anyway.
pub fn close(gate: &DeviceGate, timeout: Option<Duration>) {
    let mut guard = gate.lock();
    let Some(stream) = guard.stream.as_mut() else {
        return;
    };

    stream.clear_write_handler();
    let id = stream.id();

    if stream.state() == StreamState::Ready {
        match stream.handle.drain() {
            Ok(operation) => {
                let (next, finished, _) = wait_operation(gate, guard, operation, timeout);
                guard = next;
                match finished {
                    OperationState::Done => debug!("Stream {} drained", id),
                    OperationState::Failed => warn!("Drain of stream {} failed", id),
                    OperationState::Running => warn!("Drain of stream {} did not finish", id),
                }
            }
            Err(err) => warn!("Drain of stream {} rejected (code {}): {}", id, err.code(), err),
        }
    }

    if let Some(mut stream) = take_stream(&mut guard) {
        stream.handle.disconnect();
        debug!("Stream {} closed", id);
    }
}

/// Discard queued audio on the current stream
///
/// Succeeds trivially without a stream.
pub fn flush(gate: &DeviceGate, timeout: Option<Duration>) -> Result<()> {
    let mut guard = gate.lock();
    let Some(stream) = guard.stream.as_mut() else {
        return Ok(());
    };

    let id = stream.id();
    let operation = stream.handle.flush().map_err(|err| {
        warn!("Flush of stream {} rejected (code {}): {}", id, err.code(), err);
        DeviceError::stream(err.to_string())
    })?;

    let (_guard, finished, outcome) = wait_operation(gate, guard, operation, timeout);
    match finished {
        OperationState::Done => {
            debug!("Stream {} flushed", id);
            Ok(())
        }
        OperationState::Failed => Err(DeviceError::stream("flush failed")),
        OperationState::Running if outcome.timed_out() => {
            Err(DeviceError::Timeout { operation: "flush" })
        }
        OperationState::Running => Err(DeviceError::stream("stream lost during flush")),
    }
}

/// Wait for `operation` to finish; still `Running` on timeout or stream failure
///
/// `guard` must have been held since the operation was issued, so its
/// completion cannot be dispatched before it is marked as awaited.
fn wait_operation<'a>(
    gate: &'a DeviceGate,
    mut guard: MutexGuard<'a, DeviceState>,
    operation: OperationId,
    timeout: Option<Duration>,
) -> (MutexGuard<'a, DeviceState>, OperationState, WaitOutcome) {
    guard.awaited = Some(operation);
    guard.completed = None;

    let (mut guard, outcome) = gate.wait_while(guard, deadline_after(timeout), |state| {
        state.completed.is_none() && state.stream.as_ref().is_some_and(|s| s.state().is_good())
    });

    guard.awaited = None;
    let finished = guard.completed.take().unwrap_or(OperationState::Running);
    (guard, finished, outcome)
}

/// Remove the current stream and forget any operation awaited on it
fn take_stream(state: &mut DeviceState) -> Option<Stream> {
    state.awaited = None;
    state.completed = None;
    state.stream.take()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{AudioServer, ContextState};
    use crate::servers::loopback::{LoopbackConfig, LoopbackServer};
    use crate::event_loop::EventLoop;
    use crate::connection;
    use std::sync::Arc;

    const TIMEOUT: Option<Duration> = Some(Duration::from_secs(5));

    fn connected(server: &LoopbackServer) -> (Arc<DeviceGate>, EventLoop) {
        let gate = Arc::new(DeviceGate::default());
        let mut event_loop = EventLoop::new("stream-test");
        let context = server.new_context("test", event_loop.sink()).unwrap();
        connection::connect(&gate, context, &mut event_loop, TIMEOUT).unwrap();
        assert_eq!(
            gate.lock().connection.as_ref().map(|c| c.state()),
            Some(ContextState::Ready)
        );
        (gate, event_loop)
    }

    fn request(spec: SampleSpec) -> StreamRequest<'static> {
        StreamRequest {
            name: "test",
            device: None,
            spec,
            attr: BufferAttr::for_duration(&spec, 500, 250),
            flags: StreamFlags::playback(),
        }
    }

    #[test]
    fn open_then_close() {
        let server = LoopbackServer::default();
        let (gate, mut event_loop) = connected(&server);

        open(&gate, &request(SampleSpec::cd_quality()), TIMEOUT).unwrap();
        assert_eq!(
            gate.lock().stream.as_ref().map(Stream::state),
            Some(StreamState::Ready)
        );

        close(&gate, TIMEOUT);
        assert!(gate.lock().stream.is_none());

        let records = server.streams();
        assert_eq!(records.len(), 1);
        assert!(records[0].drained);
        assert!(records[0].closed_seq.is_some());

        event_loop.stop();
        connection::release(&gate);
    }

    #[test]
    fn failed_stream_leaves_no_stream_behind() {
        let server = LoopbackServer::new(LoopbackConfig {
            reject_streams: 1,
            ..LoopbackConfig::default()
        });
        let (gate, mut event_loop) = connected(&server);

        let err = open(&gate, &request(SampleSpec::cd_quality()), TIMEOUT).unwrap_err();
        assert!(matches!(err, DeviceError::Stream { .. }));
        assert!(gate.lock().stream.is_none());

        event_loop.stop();
        connection::release(&gate);
    }

    #[test]
    fn connect_error_disconnects_the_new_stream() {
        let server = LoopbackServer::default();
        let (gate, mut event_loop) = connected(&server);

        // An empty target is refused by connect_playback itself
        let spec = SampleSpec::cd_quality();
        let mut bad = request(spec);
        bad.attr.target_length = 0;
        let err = open(&gate, &bad, TIMEOUT).unwrap_err();
        assert!(matches!(err, DeviceError::Stream { .. }));
        assert!(gate.lock().stream.is_none());

        let records = server.streams();
        assert_eq!(records.len(), 1);
        assert!(records[0].closed_seq.is_some());

        event_loop.stop();
        connection::release(&gate);
    }

    #[test]
    fn flush_without_stream_is_ok() {
        let gate = DeviceGate::default();
        assert!(flush(&gate, TIMEOUT).is_ok());
    }

    #[test]
    fn stalled_flush_times_out() {
        let server = LoopbackServer::new(LoopbackConfig {
            stall_operations: true,
            ..LoopbackConfig::default()
        });
        let (gate, mut event_loop) = connected(&server);
        open(&gate, &request(SampleSpec::cd_quality()), TIMEOUT).unwrap();

        let err = flush(&gate, Some(Duration::from_millis(50))).unwrap_err();
        assert!(err.is_timeout());

        {
            let state = gate.lock();
            assert_eq!(state.awaited, None);
            assert_eq!(state.completed, None);
        }

        // Stalled drain: close still completes once the deadline passes
        close(&gate, Some(Duration::from_millis(50)));
        assert!(gate.lock().stream.is_none());

        event_loop.stop();
        connection::release(&gate);
    }
}
