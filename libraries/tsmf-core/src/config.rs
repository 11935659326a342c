/// Device configuration
use crate::error::{DeviceError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix for overrides (e.g. `TSMF_AUDIO_BACKEND=cpal`)
pub const ENV_PREFIX: &str = "TSMF_AUDIO";

/// Configuration for a server-backed audio device
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeviceConfig {
    /// Server backend name ("loopback" or "cpal")
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Name announced to the server for the connection
    #[serde(default = "default_client_name")]
    pub client_name: String,

    /// Name announced to the server for each playback stream
    #[serde(default = "default_stream_name")]
    pub stream_name: String,

    /// Upper bound of queued audio in the server
    #[serde(default = "default_max_length_ms")]
    pub max_length_ms: u32,

    /// Amount of audio the server tries to keep queued
    #[serde(default = "default_target_length_ms")]
    pub target_length_ms: u32,

    /// Deadline for `open`; `None` waits forever
    ///
    /// Files and the environment spell `None` as `"none"`.
    #[serde(
        default = "default_connect_timeout_ms",
        deserialize_with = "deserialize_timeout"
    )]
    pub connect_timeout_ms: Option<u64>,

    /// Deadline for stream open, capacity, drain and flush waits; `None` waits forever
    #[serde(
        default = "default_operation_timeout_ms",
        deserialize_with = "deserialize_timeout"
    )]
    pub operation_timeout_ms: Option<u64>,

    /// Accept any bit depth and play it as 16-bit instead of rejecting it
    #[serde(default)]
    pub narrow_bit_depth: bool,
}

impl DeviceConfig {
    /// Load configuration from an optional TOML file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = config::Config::builder();

        if let Some(path) = path {
            settings = settings.add_source(config::File::from(path.to_path_buf()));
        }

        // Override with environment variables (prefixed with TSMF_AUDIO_)
        settings = settings.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .try_parsing(true),
        );

        let config: Self = settings.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.client_name.trim().is_empty() {
            return Err(DeviceError::config("client_name must not be empty"));
        }

        if self.target_length_ms == 0 {
            return Err(DeviceError::config("target_length_ms must be positive"));
        }

        if self.target_length_ms > self.max_length_ms {
            return Err(DeviceError::config(format!(
                "target_length_ms ({}) exceeds max_length_ms ({})",
                self.target_length_ms, self.max_length_ms
            )));
        }

        for (name, timeout) in [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("operation_timeout_ms", self.operation_timeout_ms),
        ] {
            if timeout == Some(0) {
                return Err(DeviceError::config(format!(
                    "{} must be positive (use \"none\" to wait without a deadline)",
                    name
                )));
            }
        }

        Ok(())
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_ms.map(Duration::from_millis)
    }
}

/// Milliseconds as a number or numeric string, or `"none"` for no deadline
fn deserialize_timeout<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Timeout {
        Millis(u64),
        Text(String),
    }

    match Option::<Timeout>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Timeout::Millis(ms)) => Ok(Some(ms)),
        Some(Timeout::Text(text)) if text.trim().eq_ignore_ascii_case("none") => Ok(None),
        Some(Timeout::Text(text)) => text.trim().parse().map(Some).map_err(|_| {
            serde::de::Error::custom(format!(
                "invalid timeout '{}': expected milliseconds or \"none\"",
                text
            ))
        }),
    }
}

// Default values
fn default_backend() -> String {
    "loopback".to_string()
}

fn default_client_name() -> String {
    "tsmf".to_string()
}

fn default_stream_name() -> String {
    "tsmf playback".to_string()
}

fn default_max_length_ms() -> u32 {
    500
}

fn default_target_length_ms() -> u32 {
    250
}

fn default_connect_timeout_ms() -> Option<u64> {
    Some(5_000)
}

fn default_operation_timeout_ms() -> Option<u64> {
    Some(5_000)
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            client_name: default_client_name(),
            stream_name: default_stream_name(),
            max_length_ms: default_max_length_ms(),
            target_length_ms: default_target_length_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            operation_timeout_ms: default_operation_timeout_ms(),
            narrow_bit_depth: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = DeviceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.backend, "loopback");
        assert_eq!(config.max_length_ms, 500);
        assert_eq!(config.target_length_ms, 250);
        assert_eq!(config.operation_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn rejects_target_above_max() {
        let config = DeviceConfig {
            target_length_ms: 600,
            ..DeviceConfig::default()
        };
        assert!(matches!(config.validate(), Err(DeviceError::Config(_))));
    }

    #[test]
    fn rejects_empty_client_name() {
        let config = DeviceConfig {
            client_name: "  ".to_string(),
            ..DeviceConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_timeouts() {
        let config = DeviceConfig {
            connect_timeout_ms: Some(0),
            ..DeviceConfig::default()
        };
        assert!(matches!(config.validate(), Err(DeviceError::Config(_))));

        let config = DeviceConfig {
            operation_timeout_ms: Some(0),
            ..DeviceConfig::default()
        };
        assert!(matches!(config.validate(), Err(DeviceError::Config(_))));

        let unbounded = DeviceConfig {
            connect_timeout_ms: None,
            operation_timeout_ms: None,
            ..DeviceConfig::default()
        };
        assert!(unbounded.validate().is_ok());
    }

    #[test]
    fn rejects_zero_target() {
        let config = DeviceConfig {
            target_length_ms: 0,
            ..DeviceConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
