/// Audio server client-library errors
use thiserror::Error;
use tsmf_core::DeviceError;

/// Result type for client-library calls
pub type ServerResult<T> = std::result::Result<T, ServerError>;

/// Error returned by a server context or stream call
///
/// Each variant carries a stable numeric code, logged next to failures so
/// operators can match them against server logs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServerError {
    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Named sink or device does not exist
    #[error("No such entity: {0}")]
    NoEntity(String),

    /// Server refused or could not be reached
    #[error("Connection refused")]
    ConnectionRefused,

    /// Connection was terminated by the server
    #[error("Connection terminated")]
    Killed,

    /// Call is not valid in the object's current state
    #[error("Bad state")]
    BadState,

    /// No timing data available yet
    #[error("No data")]
    NoData,

    /// Write does not fit in the server buffer
    #[error("Data too large: {0} bytes")]
    TooLarge(usize),

    /// Operation not supported by this server
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Server-side I/O failure
    #[error("I/O error: {0}")]
    Io(String),
}

impl ServerError {
    /// Numeric error code
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidArgument(_) => 3,
            Self::NoEntity(_) => 5,
            Self::ConnectionRefused => 6,
            Self::Killed => 12,
            Self::BadState => 15,
            Self::NoData => 16,
            Self::TooLarge(_) => 18,
            Self::NotSupported(_) => 19,
            Self::Io(_) => 20,
        }
    }
}

/// Backend-related errors
#[derive(Debug, Error)]
pub enum BackendError {
    /// Backend not compiled in or not available on this system
    #[error("Audio server backend '{0}' is not available on this system")]
    BackendUnavailable(String),

    /// Backend name not recognised
    #[error("Unknown audio server backend '{0}'")]
    UnknownBackend(String),
}

impl From<BackendError> for DeviceError {
    fn from(err: BackendError) -> Self {
        DeviceError::config(err.to_string())
    }
}
