//! Backpressure-aware chunked writer
//!
//! Hands a buffer to the server in pieces no larger than the server's
//! current writable size. When the server is full the caller waits on the
//! gate for the next write request instead of polling.

use std::time::Duration;
use tracing::{debug, trace, warn};
use tsmf_core::{DeviceError, Result};

use crate::event_loop::DeviceGate;
use crate::gate::deadline_after;
use crate::server::SeekMode;

/// Accounting for one `write_all` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteReport {
    /// Bytes accepted by the server
    pub bytes_written: usize,
    /// Write calls issued
    pub chunks: usize,
    /// Times the server buffer was full and the writer had to wait
    pub stalls: usize,
}

/// Write all of `data` to the current stream
///
/// Blocks while the server buffer is full. Each wait is bounded by
/// `timeout`; a wait that expires aborts the write. The report is returned
/// alongside the result so callers can see how far a failed write got.
pub fn write_all(gate: &DeviceGate, data: &[u8], timeout: Option<Duration>) -> (WriteReport, Result<()>) {
    let mut report = WriteReport::default();
    if data.is_empty() {
        return (report, Ok(()));
    }

    let mut guard = gate.lock();
    if guard.stream.is_none() {
        return (report, Err(DeviceError::StreamNotOpen));
    }

    let abort = |report: &WriteReport, reason: String| {
        warn!(
            "Write aborted after {} of {} bytes: {}",
            report.bytes_written,
            data.len(),
            reason
        );
        DeviceError::write_abort(report.bytes_written, data.len() - report.bytes_written, reason)
    };

    while report.bytes_written < data.len() {
        let Some(stream) = guard.stream.as_mut() else {
            let err = abort(&report, "stream closed".to_string());
            return (report, Err(err));
        };

        if !stream.state().is_good() {
            let err = abort(&report, format!("stream is {:?}", stream.state()));
            return (report, Err(err));
        }

        let writable = match stream.handle.writable_size() {
            Ok(n) => n,
            Err(err) => {
                warn!("Writable size query failed (code {}): {}", err.code(), err);
                let err = abort(&report, err.to_string());
                return (report, Err(err));
            }
        };

        if writable == 0 {
            report.stalls += 1;
            let id = stream.id();
            trace!("Stream {} full, waiting for write request", id);

            // Re-checked after every dispatched event; a write request that
            // raced ahead of the capacity change does not end the wait.
            let (next, outcome) = gate.wait_while(guard, deadline_after(timeout), |state| {
                state.stream.as_ref().is_some_and(|s| {
                    s.id() == id
                        && s.state().is_good()
                        && matches!(s.handle.writable_size(), Ok(0))
                })
            });
            guard = next;

            if outcome.timed_out() {
                let err = abort(&report, "timed out waiting for capacity".to_string());
                return (report, Err(err));
            }
            continue;
        }

        let remaining = &data[report.bytes_written..];
        let chunk = &remaining[..remaining.len().min(writable)];

        if let Err(err) = stream.handle.write(chunk, 0, SeekMode::Relative) {
            warn!("Write failed (code {}): {}", err.code(), err);
            let err = abort(&report, err.to_string());
            return (report, Err(err));
        }

        report.bytes_written += chunk.len();
        report.chunks += 1;
    }

    debug!(
        "Wrote {} bytes in {} chunks ({} stalls)",
        report.bytes_written, report.chunks, report.stalls
    );
    (report, Ok(()))
}
