//! Audio server client-library seam
//!
//! These traits model the native client library of a callback-driven audio
//! server. Requests are issued by the caller thread while it holds the
//! device's condition gate. Results arrive asynchronously as [`ServerEvent`]s
//! posted into the device's event loop through an [`EventSink`]; the event
//! loop thread is the only place they are applied.
//!
//! # Important
//!
//! Implementations may post events from any thread, including from inside a
//! request call. They must never touch the device's gate.

use crossbeam_channel::Sender;
use tsmf_core::{BufferAttr, SampleSpec, StreamFlags};

use crate::error::ServerResult;
use crate::event_loop::LoopMessage;

/// Identifies one playback stream within a server
pub type StreamId = u32;

/// Identifies one asynchronous flush or drain request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(pub u64);

/// Progress of a flush or drain request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationState {
    Running,
    Done,
    Failed,
}

impl OperationState {
    pub fn from_success(success: bool) -> Self {
        if success {
            Self::Done
        } else {
            Self::Failed
        }
    }
}

/// Connection (context) lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextState {
    Unconnected,
    Connecting,
    Ready,
    Failed,
    Terminated,
}

impl ContextState {
    /// Connecting or ready
    pub fn is_good(self) -> bool {
        matches!(self, Self::Connecting | Self::Ready)
    }

    /// Ready, failed or terminated: a waiter can stop waiting
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Ready | Self::Failed | Self::Terminated)
    }
}

/// Playback stream lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    Unconnected,
    Connecting,
    Ready,
    Failed,
    Terminated,
}

impl StreamState {
    /// Connecting or ready
    pub fn is_good(self) -> bool {
        matches!(self, Self::Connecting | Self::Ready)
    }

    /// Ready, failed or terminated: a waiter can stop waiting
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Ready | Self::Failed | Self::Terminated)
    }
}

/// Where a write lands relative to the stream's write index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    /// Offset from the current write position (0 = append)
    Relative,
    /// Offset from the start of the stream
    Absolute,
}

/// Notification from the server, dispatched on the event loop thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// The context changed state
    ContextStateChanged(ContextState),
    /// A stream changed state
    StreamStateChanged { stream: StreamId, state: StreamState },
    /// The server wants more data for a stream
    WriteRequested { stream: StreamId, bytes: usize },
    /// A flush or drain finished
    OperationCompleted { operation: OperationId, success: bool },
}

/// Handle used by server implementations to post events to the event loop
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<LoopMessage>,
}

impl EventSink {
    pub(crate) fn new(tx: Sender<LoopMessage>) -> Self {
        Self { tx }
    }

    /// Queue an event for dispatch; never blocks
    ///
    /// Events posted after the loop has shut down are discarded.
    pub fn post(&self, event: ServerEvent) {
        if let Err(err) = self.tx.send(LoopMessage::Event(event)) {
            tracing::trace!("Event loop gone, dropping {:?}", err.0);
        }
    }
}

/// Entry point of a server client library
pub trait AudioServer: Send + Sync {
    /// Backend name (e.g., "loopback", "cpal")
    fn name(&self) -> &'static str;

    /// Create an unconnected context that reports to `events`
    fn new_context(
        &self,
        client_name: &str,
        events: EventSink,
    ) -> ServerResult<Box<dyn ServerContext>>;
}

/// Session handle to the server
pub trait ServerContext: Send {
    /// Start connecting; progress is reported as `ContextStateChanged`
    fn connect(&mut self) -> ServerResult<()>;

    /// Create an unconnected playback stream for `spec`
    fn new_stream(&mut self, name: &str, spec: &SampleSpec) -> ServerResult<Box<dyn ServerStream>>;

    /// Close the session; reported as `ContextStateChanged(Terminated)`
    fn disconnect(&mut self);
}

/// One playback data channel
pub trait ServerStream: Send {
    fn id(&self) -> StreamId;

    /// Start connecting for playback; progress is reported as `StreamStateChanged`
    ///
    /// `device` selects a named sink, `None` the server default.
    fn connect_playback(
        &mut self,
        device: Option<&str>,
        attr: &BufferAttr,
        flags: StreamFlags,
    ) -> ServerResult<()>;

    /// Bytes the server accepts right now without growing past its target
    fn writable_size(&self) -> ServerResult<usize>;

    /// Queue `data` at `offset` relative to `seek`
    fn write(&mut self, data: &[u8], offset: i64, seek: SeekMode) -> ServerResult<()>;

    /// End-to-end latency in microseconds
    fn latency(&self) -> ServerResult<u64>;

    /// Discard queued audio; completion arrives as `OperationCompleted`
    fn flush(&mut self) -> ServerResult<OperationId>;

    /// Wait for queued audio to finish playing; completion arrives as `OperationCompleted`
    fn drain(&mut self) -> ServerResult<OperationId>;

    /// Stop playback and release server resources
    fn disconnect(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settled_states() {
        assert!(!ContextState::Unconnected.is_settled());
        assert!(!ContextState::Connecting.is_settled());
        assert!(ContextState::Ready.is_settled());
        assert!(ContextState::Failed.is_settled());
        assert!(ContextState::Terminated.is_settled());

        assert!(StreamState::Connecting.is_good());
        assert!(!StreamState::Unconnected.is_good());
        assert!(!StreamState::Failed.is_good());
    }

    #[test]
    fn posting_to_closed_loop_is_harmless() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let sink = EventSink::new(tx);
        drop(rx);
        sink.post(ServerEvent::ContextStateChanged(ContextState::Ready));
    }
}
