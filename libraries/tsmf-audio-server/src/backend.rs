// tsmf-audio-server/src/backend.rs
//
// Audio server backend selection: the in-process loopback sink, plus the
// system audio stack through CPAL when compiled in.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tsmf_core::{AudioDevice, DeviceConfig};

use crate::device::ServerAudioDevice;
use crate::error::BackendError;
use crate::server::AudioServer;
use crate::servers::LoopbackServer;

/// Audio server backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerBackend {
    /// Clock-driven virtual sink, always available
    Loopback,

    /// System default audio stack (WASAPI, CoreAudio, ALSA)
    #[cfg(feature = "cpal")]
    Cpal,

    /// JACK Audio Connection Kit
    #[cfg(feature = "jack")]
    Jack,
}

impl ServerBackend {
    /// Name used in configuration files
    pub fn name(&self) -> &'static str {
        match self {
            Self::Loopback => "loopback",

            #[cfg(feature = "cpal")]
            Self::Cpal => "cpal",

            #[cfg(feature = "jack")]
            Self::Jack => "jack",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Loopback => "In-process virtual sink (no audio hardware)",

            #[cfg(feature = "cpal")]
            Self::Cpal => "System audio output through CPAL",

            #[cfg(feature = "jack")]
            Self::Jack => "Professional audio routing (cross-application, low-latency)",
        }
    }

    /// Parse a configured backend name (case-insensitive)
    pub fn from_name(name: &str) -> Result<Self, BackendError> {
        all_backends()
            .into_iter()
            .find(|backend| backend.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| BackendError::UnknownBackend(name.to_string()))
    }

    /// Check if backend is available on current system
    pub fn is_available(&self) -> bool {
        match self {
            Self::Loopback => true,

            #[cfg(feature = "cpal")]
            Self::Cpal => true,

            #[cfg(feature = "jack")]
            Self::Jack => cpal::available_hosts().contains(&cpal::HostId::Jack),
        }
    }

    /// Instantiate the backend's server
    pub fn create_server(&self) -> Result<Arc<dyn AudioServer>, BackendError> {
        if !self.is_available() {
            return Err(BackendError::BackendUnavailable(self.name().to_string()));
        }

        match self {
            Self::Loopback => Ok(Arc::new(LoopbackServer::default())),

            #[cfg(feature = "cpal")]
            Self::Cpal => Ok(Arc::new(crate::servers::CpalServer::new())),

            #[cfg(feature = "jack")]
            Self::Jack => Ok(Arc::new(crate::servers::CpalServer::with_host(
                cpal::HostId::Jack,
            ))),
        }
    }
}

/// Information about an audio server backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendInfo {
    pub backend: ServerBackend,
    pub name: String,
    pub description: String,
    pub available: bool,
}

fn all_backends() -> Vec<ServerBackend> {
    vec![
        ServerBackend::Loopback,
        #[cfg(feature = "cpal")]
        ServerBackend::Cpal,
        #[cfg(feature = "jack")]
        ServerBackend::Jack,
    ]
}

/// Backends usable on this system
pub fn list_available_backends() -> Vec<ServerBackend> {
    all_backends()
        .into_iter()
        .filter(ServerBackend::is_available)
        .collect()
}

/// Detailed information about every compiled-in backend
pub fn get_backend_info() -> Vec<BackendInfo> {
    all_backends()
        .into_iter()
        .map(|backend| BackendInfo {
            name: backend.name().to_string(),
            description: backend.description().to_string(),
            available: backend.is_available(),
            backend,
        })
        .collect()
}

/// Build a closed device for the backend named in `config`
pub fn create_device(config: DeviceConfig) -> tsmf_core::Result<Box<dyn AudioDevice>> {
    let backend = ServerBackend::from_name(&config.backend)?;
    let server = backend.create_server()?;
    tracing::debug!("Creating {} audio device", backend.name());
    Ok(Box::new(ServerAudioDevice::new(server, config)?))
}
