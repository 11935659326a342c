//! Event loop thread
//!
//! One background thread per device. It owns the right to change the
//! connection and stream states: every [`ServerEvent`] posted by the server is
//! applied here, under the gate lock, and the gate is signalled afterwards.
//!
//! ```text
//! ┌──────────────────┐  lock + request   ┌─────────────────────┐
//! │  Caller Thread   │──────────────────►│   Server Library    │
//! │ (open/play/...)  │                   │ (context, streams)  │
//! └────────┬─────────┘                   └──────────┬──────────┘
//!          │ wait/wake                              │ post(ServerEvent)
//!          ▼                                        ▼
//! ┌──────────────────┐   dispatch+signal ┌─────────────────────┐
//! │  Condition Gate  │◄──────────────────│  Event Loop Thread  │
//! │  (DeviceState)   │                   │   (sole mutator)    │
//! └──────────────────┘                   └─────────────────────┘
//! ```

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, trace, warn};
use tsmf_core::{DeviceError, Result};

use crate::connection::Connection;
use crate::gate::ConditionGate;
use crate::server::{EventSink, OperationId, OperationState, ServerEvent};
use crate::stream::Stream;

/// Messages consumed by the event loop thread
#[derive(Debug)]
pub enum LoopMessage {
    /// Notification from the server
    Event(ServerEvent),
    /// Shut the loop down
    Quit,
}

/// State guarded by the device's condition gate
#[derive(Default)]
pub struct DeviceState {
    pub(crate) connection: Option<Connection>,
    pub(crate) stream: Option<Stream>,
    /// Flush or drain the caller is currently waiting on
    pub(crate) awaited: Option<OperationId>,
    /// Result of the awaited operation, taken by the waiter
    pub(crate) completed: Option<OperationState>,
    /// Events applied so far
    pub(crate) dispatched: u64,
}

/// Shared gate type used by the device and its event loop
pub type DeviceGate = ConditionGate<DeviceState>;

/// Background dispatcher for server events
///
/// Events posted before [`start`](Self::start) are queued and applied once
/// the thread runs.
pub struct EventLoop {
    name: String,
    tx: Sender<LoopMessage>,
    rx: Receiver<LoopMessage>,
    thread: Option<JoinHandle<()>>,
}

impl EventLoop {
    pub fn new(name: &str) -> Self {
        // Unbounded: servers post while the caller may hold the gate,
        // so a full queue would deadlock against the dispatcher.
        let (tx, rx) = unbounded();
        Self {
            name: name.to_string(),
            tx,
            rx,
            thread: None,
        }
    }

    /// Sink handed to the server library
    pub fn sink(&self) -> EventSink {
        EventSink::new(self.tx.clone())
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Spawn the dispatch thread
    pub fn start(&mut self, gate: Arc<DeviceGate>) -> Result<()> {
        if self.thread.is_some() {
            return Ok(());
        }

        let rx = self.rx.clone();
        let handle = thread::Builder::new()
            .name(format!("{}-event-loop", self.name))
            .spawn(move || run(&gate, &rx))
            .map_err(|e| DeviceError::EventLoop(format!("failed to spawn thread: {}", e)))?;

        debug!("Event loop '{}' started", self.name);
        self.thread = Some(handle);
        Ok(())
    }

    /// Stop and join the dispatch thread
    ///
    /// Must not be called while holding the gate lock: the thread may be
    /// waiting for it to finish its current dispatch.
    pub fn stop(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };

        let _ = self.tx.send(LoopMessage::Quit);
        if handle.join().is_err() {
            warn!("Event loop '{}' panicked", self.name);
        }
        debug!("Event loop '{}' stopped", self.name);
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(gate: &DeviceGate, rx: &Receiver<LoopMessage>) {
    while let Ok(message) = rx.recv() {
        match message {
            LoopMessage::Event(event) => {
                let mut state = gate.lock();
                dispatch(&mut state, event);
                drop(state);
                gate.signal();
            }
            LoopMessage::Quit => break,
        }
    }
}

/// Apply one server event to the device state
///
/// Events addressed to a stream other than the current one are stale
/// leftovers of a closed stream and are dropped.
pub(crate) fn dispatch(state: &mut DeviceState, event: ServerEvent) {
    state.dispatched += 1;

    match event {
        ServerEvent::ContextStateChanged(new_state) => match state.connection.as_mut() {
            Some(connection) => connection.on_state_change(new_state),
            None => trace!("Context event {:?} without connection", new_state),
        },
        ServerEvent::StreamStateChanged {
            stream,
            state: new_state,
        } => match state.stream.as_mut().filter(|s| s.id() == stream) {
            Some(current) => current.on_state_change(new_state),
            None => trace!("Stale state event {:?} for stream {}", new_state, stream),
        },
        ServerEvent::WriteRequested { stream, bytes } => {
            match state.stream.as_mut().filter(|s| s.id() == stream) {
                Some(current) => current.on_write_request(bytes),
                None => trace!("Stale write request for stream {}", stream),
            }
        }
        ServerEvent::OperationCompleted { operation, success } => {
            if state.awaited == Some(operation) {
                trace!("Operation {:?} completed (success: {})", operation, success);
                state.completed = Some(OperationState::from_success(success));
            } else {
                // The waiter gave up on it, or the stream is gone
                trace!("Late completion of operation {:?} dropped", operation);
            }
        }
    }
}
