/// Server-side buffering attributes and stream flags
use serde::{Deserialize, Serialize};

use super::audio::SampleSpec;

/// Buffering attributes negotiated when a playback stream connects
///
/// All lengths are in bytes. `None` leaves the value to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferAttr {
    /// Hard cap on queued bytes
    pub max_length: u32,
    /// Amount the server tries to keep queued
    pub target_length: u32,
    /// Bytes queued before playback starts
    pub prebuffer: Option<u32>,
    /// Smallest write request the server will issue
    pub min_request: Option<u32>,
    /// Capture fragment size (unused for playback)
    pub fragment_size: Option<u32>,
}

impl BufferAttr {
    /// Attributes for `max_ms`/`target_ms` of audio in `spec`
    ///
    /// Each length holds at least one frame, so very low rates or short
    /// durations still yield a usable buffer.
    pub fn for_duration(spec: &SampleSpec, max_ms: u32, target_ms: u32) -> Self {
        let frame = spec.frame_size() as u64;
        let to_bytes = |ms: u32| {
            let bytes = spec.usec_to_bytes(u64::from(ms) * 1_000).max(frame);
            u32::try_from(bytes).unwrap_or(u32::MAX)
        };

        Self {
            max_length: to_bytes(max_ms),
            target_length: to_bytes(target_ms),
            prebuffer: None,
            min_request: None,
            fragment_size: None,
        }
    }
}

/// Flags passed when connecting a playback stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamFlags {
    /// Let the server size its own buffers from `target_length`
    pub adjust_latency: bool,
    /// Interpolate the playback clock between timing updates
    pub interpolate_timing: bool,
    /// Refresh timing information automatically
    pub auto_timing_update: bool,
}

impl StreamFlags {
    /// Flags used for every playback stream
    pub fn playback() -> Self {
        Self {
            adjust_latency: true,
            interpolate_timing: true,
            auto_timing_update: true,
        }
    }
}
