//! Audio server implementations

pub mod loopback;
#[cfg(feature = "cpal")]
pub mod system;

pub use loopback::{LoopbackConfig, LoopbackServer, StreamRecord};
#[cfg(feature = "cpal")]
pub use system::CpalServer;
