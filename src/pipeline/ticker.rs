//! CPU clock ticker for the internal clock source.
//!
//! Paces frame production/consumption at the nominal sample rate: each
//! `wait_frame` sleeps until the next frame deadline. Deadlines accumulate
//! from the start instant, so rounding errors do not drift.

use std::time::{Duration, Instant};

use crate::core::time::Nanos;

/// Sleeps the pipeline thread to the nominal frame cadence.
pub struct Ticker {
    start: Instant,
    /// Nanoseconds of media produced so far.
    position: Nanos,
}

impl Ticker {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            position: 0,
        }
    }

    /// Account `frame_ns` of media and sleep until its deadline.
    pub fn wait_frame(&mut self, frame_ns: Nanos) {
        self.position += frame_ns;
        let deadline = self.start + Duration::from_nanos(self.position.max(0) as u64);
        let now = Instant::now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
    }
}

impl Default for Ticker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MILLISECOND;

    #[test]
    fn test_paces_frames() {
        let mut ticker = Ticker::new();
        let begin = Instant::now();
        for _ in 0..5 {
            ticker.wait_frame(10 * MILLISECOND);
        }
        let elapsed = begin.elapsed();
        assert!(elapsed >= Duration::from_millis(45));
        assert!(elapsed < Duration::from_millis(500));
    }
}
