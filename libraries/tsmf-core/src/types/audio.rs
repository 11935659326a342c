/// Audio-related types
use serde::{Deserialize, Serialize};

use crate::error::{DeviceError, Result};

/// Highest sample rate a stream may be configured with
pub const MAX_SAMPLE_RATE: u32 = 384_000;

/// Highest channel count a stream may be configured with
pub const MAX_CHANNELS: u8 = 32;

const USEC_PER_SEC: u64 = 1_000_000;

/// Sample rate in Hz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleRate(pub u32);

impl SampleRate {
    /// Common sample rates
    pub const CD_QUALITY: Self = Self(44_100);
    pub const DVD_QUALITY: Self = Self(48_000);

    /// Create a new sample rate
    #[must_use]
    pub fn new(hz: u32) -> Self {
        Self(hz)
    }

    /// Get the sample rate in Hz
    pub fn as_hz(&self) -> u32 {
        self.0
    }
}

/// Per-sample encoding of PCM data sent to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// Signed 16-bit little-endian
    #[default]
    S16Le,
}

impl SampleFormat {
    /// Map a requested bit depth onto a supported format
    pub fn from_bits(bits_per_sample: u32) -> Option<Self> {
        match bits_per_sample {
            16 => Some(Self::S16Le),
            _ => None,
        }
    }

    /// Size of one sample in bytes
    pub fn sample_size(&self) -> usize {
        match self {
            Self::S16Le => 2,
        }
    }

    /// Bits per sample
    pub fn bits(&self) -> u32 {
        self.sample_size() as u32 * 8
    }
}

/// Rate, channel count and encoding of a playback stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleSpec {
    pub rate: SampleRate,
    pub channels: u8,
    pub format: SampleFormat,
}

impl SampleSpec {
    /// Create a validated 16-bit spec
    ///
    /// Rates must lie in `1..=MAX_SAMPLE_RATE`, channels in `1..=MAX_CHANNELS`.
    pub fn new(rate: u32, channels: u32) -> Result<Self> {
        if rate == 0 || rate > MAX_SAMPLE_RATE {
            return Err(DeviceError::InvalidFormat(format!(
                "sample rate {} outside 1..={}",
                rate, MAX_SAMPLE_RATE
            )));
        }
        let channels = u8::try_from(channels)
            .ok()
            .filter(|c| (1..=MAX_CHANNELS).contains(c))
            .ok_or_else(|| {
                DeviceError::InvalidFormat(format!(
                    "channel count {} outside 1..={}",
                    channels, MAX_CHANNELS
                ))
            })?;

        Ok(Self {
            rate: SampleRate(rate),
            channels,
            format: SampleFormat::S16Le,
        })
    }

    /// CD quality stereo (44.1kHz, 16-bit, stereo)
    pub fn cd_quality() -> Self {
        Self {
            rate: SampleRate::CD_QUALITY,
            channels: 2,
            format: SampleFormat::S16Le,
        }
    }

    /// Bytes per frame (one sample for every channel)
    pub fn frame_size(&self) -> usize {
        self.format.sample_size() * usize::from(self.channels)
    }

    /// Byte rate (bytes per second)
    pub fn bytes_per_second(&self) -> u64 {
        u64::from(self.rate.as_hz()) * self.frame_size() as u64
    }

    /// Bytes needed to hold `usec` microseconds of audio, rounded down to whole frames
    pub fn usec_to_bytes(&self, usec: u64) -> u64 {
        let frames = usec * u64::from(self.rate.as_hz()) / USEC_PER_SEC;
        frames * self.frame_size() as u64
    }

    /// Playback duration of `bytes` in microseconds (partial frames are ignored)
    pub fn bytes_to_usec(&self, bytes: u64) -> u64 {
        let frames = bytes / self.frame_size() as u64;
        frames * USEC_PER_SEC / u64::from(self.rate.as_hz())
    }
}

impl std::fmt::Display for SampleSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "s{}le {}ch {}Hz",
            self.format.bits(),
            self.channels,
            self.rate.as_hz()
        )
    }
}
