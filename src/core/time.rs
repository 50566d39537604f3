//! Nanosecond time helpers.
//!
//! All latencies, timeouts and capture timestamps in the pipeline are signed
//! nanoseconds. Capture timestamps count from the Unix epoch; deadlines and
//! timeouts use the monotonic clock.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Signed nanoseconds.
pub type Nanos = i64;

/// One millisecond in nanoseconds.
pub const MILLISECOND: Nanos = 1_000_000;

/// One second in nanoseconds.
pub const SECOND: Nanos = 1_000_000_000;

/// Current Unix time in nanoseconds.
pub fn now_unix_ns() -> Nanos {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as Nanos)
        .unwrap_or(0)
}

/// Monotonic timestamp in nanoseconds, relative to a process-wide origin.
pub fn now_monotonic_ns() -> Nanos {
    use std::sync::OnceLock;
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    let origin = ORIGIN.get_or_init(Instant::now);
    origin.elapsed().as_nanos() as Nanos
}

/// Convert a sample count to nanoseconds at the given rate.
pub fn samples_to_ns(samples: u64, sample_rate: u32) -> Nanos {
    if sample_rate == 0 {
        return 0;
    }
    (samples as i128 * SECOND as i128 / sample_rate as i128) as Nanos
}

/// Convert nanoseconds to a sample count at the given rate, rounding down.
pub fn ns_to_samples(ns: Nanos, sample_rate: u32) -> u64 {
    if ns <= 0 {
        return 0;
    }
    (ns as i128 * sample_rate as i128 / SECOND as i128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_conversion() {
        assert_eq!(samples_to_ns(48000, 48000), SECOND);
        assert_eq!(samples_to_ns(480, 48000), 10 * MILLISECOND);
        assert_eq!(ns_to_samples(SECOND, 44100), 44100);
        assert_eq!(ns_to_samples(-5, 44100), 0);
    }

    #[test]
    fn test_monotonic_moves_forward() {
        let a = now_monotonic_ns();
        let b = now_monotonic_ns();
        assert!(b >= a);
    }
}
