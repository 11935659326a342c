//! Server connection (context) management

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tsmf_core::{DeviceError, Result};

use crate::event_loop::{DeviceGate, EventLoop};
use crate::gate::deadline_after;
use crate::server::{ContextState, ServerContext};

/// Session with the audio server
///
/// `state` is only written by the event loop thread.
pub struct Connection {
    pub(crate) handle: Box<dyn ServerContext>,
    state: ContextState,
}

impl Connection {
    pub fn new(handle: Box<dyn ServerContext>) -> Self {
        Self {
            handle,
            state: ContextState::Unconnected,
        }
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub(crate) fn on_state_change(&mut self, state: ContextState) {
        debug!("Context state: {:?} -> {:?}", self.state, state);
        self.state = state;
    }
}

/// Connect `handle` and block until the context settles
///
/// The event loop is started while the gate is held so no state change can
/// be applied before the caller starts waiting. On failure the context is
/// disconnected and taken out of the gate again; the caller stops the loop.
pub fn connect(
    gate: &Arc<DeviceGate>,
    handle: Box<dyn ServerContext>,
    event_loop: &mut EventLoop,
    timeout: Option<Duration>,
) -> Result<()> {
    let mut guard = gate.lock();
    let connection = guard.connection.insert(Connection::new(handle));

    if let Err(err) = connection.handle.connect() {
        warn!("Context connect failed (code {}): {}", err.code(), err);
        if let Some(mut connection) = guard.connection.take() {
            connection.handle.disconnect();
        }
        return Err(DeviceError::connection(err.to_string()));
    }

    if let Err(err) = event_loop.start(Arc::clone(gate)) {
        if let Some(mut connection) = guard.connection.take() {
            connection.handle.disconnect();
        }
        return Err(err);
    }

    let (mut guard, outcome) = gate.wait_while(guard, deadline_after(timeout), |state| {
        state
            .connection
            .as_ref()
            .is_some_and(|c| !c.state().is_settled())
    });

    let state = guard
        .connection
        .as_ref()
        .map_or(ContextState::Terminated, Connection::state);

    if state == ContextState::Ready {
        info!("Connected to audio server");
        return Ok(());
    }

    if let Some(mut connection) = guard.connection.take() {
        connection.handle.disconnect();
    }

    if outcome.timed_out() {
        warn!("Timed out waiting for the server connection");
        Err(DeviceError::Timeout {
            operation: "connection",
        })
    } else {
        warn!("Server connection ended in state {:?}", state);
        Err(DeviceError::connection(format!(
            "context ended in state {:?}",
            state
        )))
    }
}

/// Disconnect and drop the context, if any
pub fn release(gate: &DeviceGate) {
    let connection = gate.lock().connection.take();
    if let Some(mut connection) = connection {
        connection.handle.disconnect();
        debug!("Context released");
    }
}
