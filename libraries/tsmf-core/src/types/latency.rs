//! Latency unit conversion for the virtual channel (1 tick = 100ns)

/// Ticks in one microsecond
pub const TICKS_PER_USEC: u64 = 10;

/// Convert server-reported microseconds into 100ns ticks, saturating
pub fn usec_to_ticks(usec: u64) -> u64 {
    usec.saturating_mul(TICKS_PER_USEC)
}
