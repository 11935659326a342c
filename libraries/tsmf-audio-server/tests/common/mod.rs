//! Shared helpers for the audio server integration tests

#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::time::Duration;
use tsmf_audio_server::{LoopbackConfig, LoopbackServer, ServerAudioDevice};
use tsmf_core::DeviceConfig;

static INIT: Once = Once::new();

/// Target length in bytes for 16-bit stereo at 44.1kHz with the default config
pub const CD_TARGET: usize = 44_100;

pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

/// Loopback that plays 8x faster than real time and keeps every byte
pub fn fast_loopback() -> LoopbackConfig {
    LoopbackConfig {
        speed: 8.0,
        tick: Duration::from_millis(5),
        capture: true,
        ..LoopbackConfig::default()
    }
}

/// Device config with short timeouts so a stuck wait fails the test quickly
pub fn test_config() -> DeviceConfig {
    DeviceConfig {
        connect_timeout_ms: Some(2_000),
        operation_timeout_ms: Some(2_000),
        ..DeviceConfig::default()
    }
}

pub fn device_with(server: &Arc<LoopbackServer>, config: DeviceConfig) -> ServerAudioDevice {
    init_tracing();
    let server: Arc<LoopbackServer> = Arc::clone(server);
    ServerAudioDevice::new(server, config).expect("valid config")
}

pub fn device(server: &Arc<LoopbackServer>) -> ServerAudioDevice {
    device_with(server, test_config())
}

/// Recognisable PCM bytes: a counter that wraps at a prime
pub fn pcm(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
