mod audio;
mod buffer;
mod latency;

pub use audio::{SampleFormat, SampleRate, SampleSpec, MAX_CHANNELS, MAX_SAMPLE_RATE};
pub use buffer::{BufferAttr, StreamFlags};
pub use latency::{usec_to_ticks, TICKS_PER_USEC};
