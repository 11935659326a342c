//! In-process loopback server
//!
//! A virtual sink that "plays" queued bytes against a wall clock. Each
//! connected stream owns a clock thread that consumes audio at the stream's
//! byte rate and asks for more data as room frees up, the same way a real
//! server's write-request callback behaves.
//!
//! Everything written is recorded so callers can inspect exactly what reached
//! the server. Faults (unreachable server, rejected streams, failing writes,
//! operations that never complete) can be injected through
//! [`LoopbackConfig`].

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace, warn};
use tsmf_core::{BufferAttr, SampleSpec, StreamFlags};

use crate::error::{ServerError, ServerResult};
use crate::server::{
    AudioServer, ContextState, EventSink, OperationId, SeekMode, ServerContext, ServerEvent,
    ServerStream, StreamId, StreamState,
};

/// Behaviour of a [`LoopbackServer`]
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Contexts reach Ready; otherwise they fail while connecting
    pub reachable: bool,
    /// Sink names accepted by `connect_playback`; `None` accepts any name
    pub known_devices: Option<Vec<String>>,
    /// Number of upcoming stream connections to reject
    pub reject_streams: usize,
    /// Writes fail once a stream would exceed this many accepted bytes
    pub fail_write_after: Option<usize>,
    /// Flush and drain requests never complete
    pub stall_operations: bool,
    /// Connecting streams never settle
    pub hold_streams: bool,
    /// Playback speed multiplier (1.0 = real time)
    pub speed: f64,
    /// Clock period
    pub tick: Duration,
    /// Keep a copy of every accepted byte
    pub capture: bool,
    /// Stream records kept for inspection; older ones are forgotten
    pub history: usize,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            reachable: true,
            known_devices: None,
            reject_streams: 0,
            fail_write_after: None,
            stall_operations: false,
            hold_streams: false,
            speed: 1.0,
            tick: Duration::from_millis(10),
            capture: false,
            history: 64,
        }
    }
}

/// Snapshot of one stream as seen by the server
///
/// `*_seq` fields are stamps from a counter shared by all streams of a
/// server, so they order events across streams.
#[derive(Debug, Clone, Default)]
pub struct StreamRecord {
    pub id: StreamId,
    pub name: String,
    pub spec: Option<SampleSpec>,
    pub device: Option<String>,
    pub attr: Option<BufferAttr>,
    pub flags: Option<StreamFlags>,
    /// Bytes accepted by `write`
    pub bytes_written: usize,
    /// Bytes consumed by the clock
    pub bytes_played: usize,
    /// Accepted bytes, in order (only with `capture`)
    pub captured: Vec<u8>,
    pub writes: usize,
    pub flushes: usize,
    pub drained: bool,
    pub ready_seq: Option<u64>,
    pub closed_seq: Option<u64>,
    pub first_write_seq: Option<u64>,
    pub last_write_seq: Option<u64>,
}

struct Sink {
    record: StreamRecord,
    spec: SampleSpec,
    state: StreamState,
    queued: usize,
    max_length: usize,
    target_length: usize,
    /// Fractional bytes owed by the clock
    budget: f64,
    pending_drain: Option<OperationId>,
    stalled: Vec<OperationId>,
}

struct Inner {
    config: LoopbackConfig,
    reachable: AtomicBool,
    next_stream: AtomicU32,
    next_operation: AtomicU64,
    sequence: AtomicU64,
    reject_streams: AtomicUsize,
    active_clocks: AtomicUsize,
    sinks: Mutex<Vec<Arc<Mutex<Sink>>>>,
}

impl Inner {
    fn next_seq(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn next_operation(&self) -> OperationId {
        OperationId(self.next_operation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn take_rejection(&self) -> bool {
        self.reject_streams
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Loopback audio server
#[derive(Clone)]
pub struct LoopbackServer {
    inner: Arc<Inner>,
}

impl LoopbackServer {
    pub fn new(config: LoopbackConfig) -> Self {
        let reject_streams = config.reject_streams;
        let reachable = config.reachable;
        Self {
            inner: Arc::new(Inner {
                config,
                reachable: AtomicBool::new(reachable),
                next_stream: AtomicU32::new(0),
                next_operation: AtomicU64::new(0),
                sequence: AtomicU64::new(0),
                reject_streams: AtomicUsize::new(reject_streams),
                active_clocks: AtomicUsize::new(0),
                sinks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Snapshots of the most recent streams (at most `history`), oldest first
    pub fn streams(&self) -> Vec<StreamRecord> {
        lock(&self.inner.sinks)
            .iter()
            .map(|sink| lock(sink).record.clone())
            .collect()
    }

    /// Clock threads currently running
    pub fn active_clocks(&self) -> usize {
        self.inner.active_clocks.load(Ordering::SeqCst)
    }

    /// Make later context connections succeed or fail
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Reject the next `count` stream connections
    pub fn reject_next_streams(&self, count: usize) {
        self.inner.reject_streams.store(count, Ordering::SeqCst);
    }
}

impl Default for LoopbackServer {
    fn default() -> Self {
        Self::new(LoopbackConfig::default())
    }
}

impl AudioServer for LoopbackServer {
    fn name(&self) -> &'static str {
        "loopback"
    }

    fn new_context(
        &self,
        client_name: &str,
        events: EventSink,
    ) -> ServerResult<Box<dyn ServerContext>> {
        if client_name.is_empty() {
            return Err(ServerError::InvalidArgument("empty client name".into()));
        }
        Ok(Box::new(LoopbackContext {
            inner: Arc::clone(&self.inner),
            events,
            state: ContextState::Unconnected,
        }))
    }
}

struct LoopbackContext {
    inner: Arc<Inner>,
    events: EventSink,
    state: ContextState,
}

impl ServerContext for LoopbackContext {
    fn connect(&mut self) -> ServerResult<()> {
        if self.state != ContextState::Unconnected {
            return Err(ServerError::BadState);
        }

        self.events
            .post(ServerEvent::ContextStateChanged(ContextState::Connecting));

        self.state = if self.inner.reachable.load(Ordering::SeqCst) {
            ContextState::Ready
        } else {
            debug!("Loopback server unreachable");
            ContextState::Failed
        };
        self.events
            .post(ServerEvent::ContextStateChanged(self.state));
        Ok(())
    }

    fn new_stream(&mut self, name: &str, spec: &SampleSpec) -> ServerResult<Box<dyn ServerStream>> {
        if self.state != ContextState::Ready {
            return Err(ServerError::BadState);
        }

        let id = self.inner.next_stream.fetch_add(1, Ordering::SeqCst) + 1;
        let sink = Arc::new(Mutex::new(Sink {
            record: StreamRecord {
                id,
                name: name.to_string(),
                spec: Some(*spec),
                ..StreamRecord::default()
            },
            spec: *spec,
            state: StreamState::Unconnected,
            queued: 0,
            max_length: 0,
            target_length: 0,
            budget: 0.0,
            pending_drain: None,
            stalled: Vec::new(),
        }));
        {
            let mut sinks = lock(&self.inner.sinks);
            sinks.push(Arc::clone(&sink));
            let excess = sinks.len().saturating_sub(self.inner.config.history);
            sinks.drain(..excess);
        }

        Ok(Box::new(LoopbackStream {
            inner: Arc::clone(&self.inner),
            events: self.events.clone(),
            id,
            sink,
            clock: None,
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

struct Clock {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

struct LoopbackStream {
    inner: Arc<Inner>,
    events: EventSink,
    id: StreamId,
    sink: Arc<Mutex<Sink>>,
    clock: Option<Clock>,
}

impl LoopbackStream {
    fn post_state(&self, state: StreamState) {
        self.events.post(ServerEvent::StreamStateChanged {
            stream: self.id,
            state,
        });
    }

    fn ready_sink(&self) -> ServerResult<MutexGuard<'_, Sink>> {
        let sink = lock(&self.sink);
        if sink.state == StreamState::Ready {
            Ok(sink)
        } else {
            Err(ServerError::BadState)
        }
    }

    fn start_clock(&mut self) -> ServerResult<()> {
        let (stop, stopped) = bounded::<()>(1);
        let inner = Arc::clone(&self.inner);
        let sink = Arc::clone(&self.sink);
        let events = self.events.clone();
        let id = self.id;
        let tick = self.inner.config.tick;

        self.inner.active_clocks.fetch_add(1, Ordering::SeqCst);
        let spawned = thread::Builder::new()
            .name(format!("loopback-clock-{}", id))
            .spawn(move || {
                loop {
                    match stopped.recv_timeout(tick) {
                        Err(RecvTimeoutError::Timeout) => advance(&inner, &sink, &events, id, tick),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                inner.active_clocks.fetch_sub(1, Ordering::SeqCst);
            });

        match spawned {
            Ok(thread) => {
                self.clock = Some(Clock { stop, thread });
                Ok(())
            }
            Err(err) => {
                self.inner.active_clocks.fetch_sub(1, Ordering::SeqCst);
                Err(ServerError::Io(err.to_string()))
            }
        }
    }

    fn stop_clock(&mut self) {
        if let Some(clock) = self.clock.take() {
            let _ = clock.stop.send(());
            if clock.thread.join().is_err() {
                warn!("Loopback clock for stream {} panicked", self.id);
            }
        }
    }
}

/// One clock tick: consume audio, finish drains, request more data
fn advance(inner: &Inner, sink: &Mutex<Sink>, events: &EventSink, id: StreamId, tick: Duration) {
    let mut sink = lock(sink);
    if sink.state != StreamState::Ready {
        return;
    }

    let frame = sink.spec.frame_size();
    sink.budget += sink.spec.bytes_per_second() as f64 * tick.as_secs_f64() * inner.config.speed;
    let whole_frames = (sink.budget / frame as f64).floor() as usize;
    let consumed = (whole_frames * frame).min(sink.queued);

    sink.queued -= consumed;
    sink.record.bytes_played += consumed;
    if sink.queued == 0 {
        // Underrun: unused time is not banked
        sink.budget = 0.0;
    } else {
        sink.budget -= consumed as f64;
    }

    if sink.queued == 0 {
        if let Some(operation) = sink.pending_drain.take() {
            sink.record.drained = true;
            trace!("Loopback stream {} drained", id);
            events.post(ServerEvent::OperationCompleted {
                operation,
                success: true,
            });
        }
    }

    let writable = sink.target_length.saturating_sub(sink.queued);
    if consumed > 0 && writable > 0 {
        events.post(ServerEvent::WriteRequested {
            stream: id,
            bytes: writable,
        });
    }
}

impl ServerStream for LoopbackStream {
    fn id(&self) -> StreamId {
        self.id
    }

    fn connect_playback(
        &mut self,
        device: Option<&str>,
        attr: &BufferAttr,
        flags: StreamFlags,
    ) -> ServerResult<()> {
        if attr.target_length == 0 || attr.target_length > attr.max_length {
            return Err(ServerError::InvalidArgument(format!(
                "target length {} with max length {}",
                attr.target_length, attr.max_length
            )));
        }

        {
            let mut sink = lock(&self.sink);
            if sink.state != StreamState::Unconnected {
                return Err(ServerError::BadState);
            }
            sink.record.device = device.map(str::to_string);
            sink.record.attr = Some(*attr);
            sink.record.flags = Some(flags);
            sink.max_length = attr.max_length as usize;
            sink.target_length = attr.target_length as usize;
        }

        self.post_state(StreamState::Connecting);

        if self.inner.config.hold_streams {
            lock(&self.sink).state = StreamState::Connecting;
            return Ok(());
        }

        let unknown_device = match (device, &self.inner.config.known_devices) {
            (Some(name), Some(known)) => !known.iter().any(|k| k == name),
            _ => false,
        };
        if unknown_device || self.inner.take_rejection() {
            debug!(
                "Loopback rejecting stream {} (device: {:?})",
                self.id, device
            );
            lock(&self.sink).state = StreamState::Failed;
            self.post_state(StreamState::Failed);
            return Ok(());
        }

        let target = {
            let mut sink = lock(&self.sink);
            sink.state = StreamState::Ready;
            sink.record.ready_seq = Some(self.inner.next_seq());
            sink.target_length
        };
        self.post_state(StreamState::Ready);
        self.events.post(ServerEvent::WriteRequested {
            stream: self.id,
            bytes: target,
        });

        self.start_clock()
    }

    fn writable_size(&self) -> ServerResult<usize> {
        let sink = self.ready_sink()?;
        Ok(sink.target_length.saturating_sub(sink.queued))
    }

    fn write(&mut self, data: &[u8], offset: i64, seek: SeekMode) -> ServerResult<()> {
        if seek != SeekMode::Relative || offset != 0 {
            return Err(ServerError::NotSupported(format!(
                "seek {:?} with offset {}",
                seek, offset
            )));
        }

        let mut sink = self.ready_sink()?;

        if let Some(limit) = self.inner.config.fail_write_after {
            if sink.record.bytes_written + data.len() > limit {
                return Err(ServerError::Io("injected write failure".into()));
            }
        }
        if sink.queued + data.len() > sink.max_length {
            return Err(ServerError::TooLarge(data.len()));
        }

        let seq = self.inner.next_seq();
        sink.queued += data.len();
        sink.record.bytes_written += data.len();
        sink.record.writes += 1;
        sink.record.first_write_seq.get_or_insert(seq);
        sink.record.last_write_seq = Some(seq);
        if self.inner.config.capture {
            sink.record.captured.extend_from_slice(data);
        }
        Ok(())
    }

    fn latency(&self) -> ServerResult<u64> {
        let sink = self.ready_sink().map_err(|_| ServerError::NoData)?;
        Ok(sink.spec.bytes_to_usec(sink.queued as u64))
    }

    fn flush(&mut self) -> ServerResult<OperationId> {
        let mut sink = self.ready_sink()?;
        let operation = self.inner.next_operation();

        if self.inner.config.stall_operations {
            sink.stalled.push(operation);
            return Ok(operation);
        }

        sink.queued = 0;
        sink.budget = 0.0;
        sink.record.flushes += 1;
        let writable = sink.target_length;
        drop(sink);

        self.events.post(ServerEvent::OperationCompleted {
            operation,
            success: true,
        });
        self.events.post(ServerEvent::WriteRequested {
            stream: self.id,
            bytes: writable,
        });
        Ok(operation)
    }

    fn drain(&mut self) -> ServerResult<OperationId> {
        let mut sink = self.ready_sink()?;
        let operation = self.inner.next_operation();

        if self.inner.config.stall_operations {
            sink.stalled.push(operation);
            return Ok(operation);
        }

        if sink.queued == 0 {
            sink.record.drained = true;
            drop(sink);
            self.events.post(ServerEvent::OperationCompleted {
                operation,
                success: true,
            });
        } else if let Some(previous) = sink.pending_drain.replace(operation) {
            drop(sink);
            self.events.post(ServerEvent::OperationCompleted {
                operation: previous,
                success: false,
            });
        }
        Ok(operation)
    }

    fn disconnect(&mut self) {
        self.stop_clock();

        let mut sink = lock(&self.sink);
        if sink.state == StreamState::Terminated {
            return;
        }
        sink.state = StreamState::Terminated;
        sink.record.closed_seq = Some(self.inner.next_seq());

        let mut abandoned: Vec<OperationId> = sink.stalled.drain(..).collect();
        abandoned.extend(sink.pending_drain.take());
        drop(sink);

        for operation in abandoned {
            self.events.post(ServerEvent::OperationCompleted {
                operation,
                success: false,
            });
        }
        self.post_state(StreamState::Terminated);
    }
}

impl Drop for LoopbackStream {
    fn drop(&mut self) {
        self.stop_clock();
    }
}
