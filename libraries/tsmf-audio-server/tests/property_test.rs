//! Property-based tests for format negotiation and play's byte accounting
//!
//! Every valid sample spec must yield a ready stream. Every byte handed to
//! play must reach the server exactly once and in order, whatever the buffer
//! size relative to the server's capacity.

mod common;

use common::{device, fast_loopback, pcm, CD_TARGET};
use proptest::prelude::*;
use std::sync::Arc;
use tsmf_audio_server::server::StreamState;
use tsmf_audio_server::LoopbackServer;
use tsmf_core::{AudioDevice, MAX_CHANNELS, MAX_SAMPLE_RATE};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Property: any valid rate and channel count opens a stream with no latency yet
    #[test]
    fn every_valid_spec_opens_a_stream(
        rate in 1u32..=MAX_SAMPLE_RATE,
        channels in 1u32..=u32::from(MAX_CHANNELS),
    ) {
        let server = Arc::new(LoopbackServer::new(fast_loopback()));
        let mut device = device(&server);
        device.open(None).unwrap();

        prop_assert!(device.set_format(rate, channels, 16).is_ok());
        prop_assert_eq!(device.stream_state(), Some(StreamState::Ready));
        prop_assert_eq!(device.latency(), 0);

        let spec = device.sample_spec().unwrap();
        prop_assert_eq!(spec.rate.as_hz(), rate);
        prop_assert_eq!(u32::from(spec.channels), channels);
        device.free();
    }

    /// Property: bytes written across all chunks sum to the input size
    #[test]
    fn play_writes_every_byte_once(len in 0usize..(3 * CD_TARGET)) {
        let server = Arc::new(LoopbackServer::new(fast_loopback()));
        let mut device = device(&server);
        device.open(None).unwrap();
        device.set_format(44_100, 2, 16).unwrap();

        let data = pcm(len);
        device.play(data.clone()).unwrap();

        let report = device.last_write();
        prop_assert_eq!(report.bytes_written, len);

        let record = &server.streams()[0];
        prop_assert_eq!(record.writes, report.chunks);
        prop_assert_eq!(&record.captured, &data);
    }

    /// Property: a buffer that fits the free capacity goes out in one chunk
    #[test]
    fn fitting_buffer_never_stalls(len in 1usize..=CD_TARGET) {
        let server = Arc::new(LoopbackServer::new(fast_loopback()));
        let mut device = device(&server);
        device.open(None).unwrap();
        device.set_format(44_100, 2, 16).unwrap();

        device.play(pcm(len)).unwrap();

        let report = device.last_write();
        prop_assert_eq!(report.chunks, 1);
        prop_assert_eq!(report.stalls, 0);
    }

    /// Property: split plays capture the same bytes as one play
    #[test]
    fn split_plays_preserve_order(
        len in 1usize..(2 * CD_TARGET),
        split in 0.0f64..1.0,
    ) {
        let server = Arc::new(LoopbackServer::new(fast_loopback()));
        let mut device = device(&server);
        device.open(None).unwrap();
        device.set_format(44_100, 2, 16).unwrap();

        let data = pcm(len);
        let at = ((len as f64) * split) as usize;
        device.play(data[..at].to_vec()).unwrap();
        device.play(data[at..].to_vec()).unwrap();

        prop_assert_eq!(&server.streams()[0].captured, &data);
    }
}
