/// Backpressure behaviour of play, flush and the bounded waits
mod common;

use common::{device, device_with, fast_loopback, pcm, test_config, CD_TARGET};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tsmf_audio_server::{LoopbackConfig, LoopbackServer, WriteReport};
use tsmf_core::{AudioDevice, DeviceConfig, DeviceError};

fn open_cd(server: &Arc<LoopbackServer>, config: DeviceConfig) -> tsmf_audio_server::ServerAudioDevice {
    let mut device = device_with(server, config);
    device.open(None).unwrap();
    device.set_format(44_100, 2, 16).unwrap();
    device
}

#[test]
fn test_small_buffer_does_not_block() {
    let server = Arc::new(LoopbackServer::new(fast_loopback()));
    let mut device = open_cd(&server, test_config());

    device.play(pcm(CD_TARGET / 2)).unwrap();
    assert_eq!(
        device.last_write(),
        WriteReport {
            bytes_written: CD_TARGET / 2,
            chunks: 1,
            stalls: 0,
        }
    );
}

#[test]
fn test_large_buffer_is_written_exactly_once() {
    let server = Arc::new(LoopbackServer::new(fast_loopback()));
    let mut device = open_cd(&server, test_config());

    let data = pcm(4 * CD_TARGET + 123);
    device.play(data.clone()).unwrap();

    let report = device.last_write();
    assert_eq!(report.bytes_written, data.len());
    assert!(report.chunks > 1);
    assert!(report.stalls >= 1);
    assert!(report.stalls < report.chunks);

    // No loss, no duplication, original order
    let record = &server.streams()[0];
    assert_eq!(record.bytes_written, data.len());
    assert_eq!(record.writes, report.chunks);
    assert_eq!(record.captured, data);
}

#[test]
fn test_consecutive_plays_append() {
    let server = Arc::new(LoopbackServer::new(fast_loopback()));
    let mut device = open_cd(&server, test_config());

    let first = pcm(CD_TARGET + 10);
    let second: Vec<u8> = pcm(CD_TARGET).into_iter().rev().collect();
    device.play(first.clone()).unwrap();
    device.play(second.clone()).unwrap();

    let captured = server.streams()[0].captured.clone();
    assert_eq!(captured.len(), first.len() + second.len());
    assert_eq!(&captured[..first.len()], &first[..]);
    assert_eq!(&captured[first.len()..], &second[..]);
}

#[test]
fn test_zero_length_play() {
    let server = Arc::new(LoopbackServer::new(fast_loopback()));
    let mut device = open_cd(&server, test_config());

    device.play(Vec::new()).unwrap();
    assert_eq!(device.last_write(), WriteReport::default());
    assert_eq!(server.streams()[0].writes, 0);
}

#[test]
fn test_play_without_stream() {
    let server = Arc::new(LoopbackServer::new(fast_loopback()));
    let mut device = device(&server);
    device.open(None).unwrap();

    assert_eq!(device.play(pcm(16)), Err(DeviceError::StreamNotOpen));
    // Zero-length input succeeds even without a stream
    assert!(device.play(Vec::new()).is_ok());
}

#[test]
fn test_write_error_aborts_with_prefix_kept() {
    let server = Arc::new(LoopbackServer::new(LoopbackConfig {
        fail_write_after: Some(50_000),
        ..fast_loopback()
    }));
    let mut device = open_cd(&server, test_config());

    let data = pcm(3 * CD_TARGET);
    let err = device.play(data.clone()).unwrap_err();

    let DeviceError::WriteAbort {
        written, dropped, ..
    } = err
    else {
        panic!("expected WriteAbort, got {:?}", err);
    };
    assert!(written >= CD_TARGET && written <= 50_000);
    assert_eq!(written + dropped, data.len());
    assert_eq!(device.last_write().bytes_written, written);

    let record = &server.streams()[0];
    assert_eq!(record.captured, data[..written].to_vec());
}

#[test]
fn test_capacity_wait_times_out() {
    // Clock stopped: the sink never frees any room
    let server = Arc::new(LoopbackServer::new(LoopbackConfig {
        speed: 0.0,
        ..fast_loopback()
    }));
    let config = DeviceConfig {
        operation_timeout_ms: Some(100),
        ..test_config()
    };
    let mut device = open_cd(&server, config);

    let start = Instant::now();
    let err = device.play(pcm(2 * CD_TARGET)).unwrap_err();
    assert!(start.elapsed() >= Duration::from_millis(100));

    match err {
        DeviceError::WriteAbort {
            written,
            dropped,
            reason,
        } => {
            assert_eq!(written, CD_TARGET);
            assert_eq!(dropped, CD_TARGET);
            assert!(reason.contains("timed out"));
        }
        other => panic!("expected WriteAbort, got {:?}", other),
    }
    assert_eq!(device.last_write().stalls, 1);
}

#[test]
fn test_flush_discards_queued_audio() {
    let server = Arc::new(LoopbackServer::new(LoopbackConfig {
        speed: 0.0,
        ..fast_loopback()
    }));
    let mut device = open_cd(&server, test_config());

    device.play(pcm(CD_TARGET)).unwrap();
    assert!(device.latency() > 0);

    device.flush().unwrap();
    assert_eq!(device.latency(), 0);
    assert_eq!(server.streams()[0].flushes, 1);

    // Room is back: a full target fits without waiting
    device.play(pcm(CD_TARGET)).unwrap();
    assert_eq!(device.last_write().stalls, 0);

    device.flush().unwrap();
}

#[test]
fn test_flush_without_stream() {
    let server = Arc::new(LoopbackServer::new(fast_loopback()));
    let mut device = device(&server);
    assert!(device.flush().is_ok());

    device.open(None).unwrap();
    assert!(device.flush().is_ok());
}

#[test]
fn test_stalled_flush_and_drain_time_out() {
    let server = Arc::new(LoopbackServer::new(LoopbackConfig {
        stall_operations: true,
        ..fast_loopback()
    }));
    let config = DeviceConfig {
        operation_timeout_ms: Some(100),
        ..test_config()
    };
    let mut device = open_cd(&server, config);
    device.play(pcm(1_024)).unwrap();

    let err = device.flush().unwrap_err();
    assert_eq!(err, DeviceError::Timeout { operation: "flush" });

    // The stalled drain inside free gives up after the deadline
    let start = Instant::now();
    device.free();
    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(!server.streams()[0].drained);
    assert!(server.streams()[0].closed_seq.is_some());
    assert_eq!(server.active_clocks(), 0);
}

#[test]
fn test_latency_is_reported_in_ticks() {
    let server = Arc::new(LoopbackServer::new(LoopbackConfig {
        speed: 0.0,
        ..fast_loopback()
    }));
    let mut device = open_cd(&server, test_config());

    // 100ms of CD audio queued on a stopped clock
    device.play(pcm(17_640)).unwrap();
    assert_eq!(device.latency(), 100_000 * 10);
}
