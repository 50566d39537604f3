//! Moving histogram with quantile estimation.
//!
//! Keeps bin counters over the last W samples plus the raw samples in a ring
//! so the counter of the evicted value's bin can be decremented. Quantiles
//! scan the counters and report the upper edge of the bin where the
//! cumulative count crosses the requested rank.

use super::ring_queue::RingQueue;

/// Histogram of the last `win_len` samples, binned over `[lo, hi]`.
pub struct MovHistogram {
    lo: f64,
    hi: f64,
    bin_width: f64,
    counters: Vec<u64>,
    ring: RingQueue<f64>,
    win_len: usize,
}

impl MovHistogram {
    pub fn new(lo: f64, hi: f64, num_bins: usize, win_len: usize) -> Self {
        assert!(hi > lo, "mov histogram: invalid value range");
        assert!(num_bins > 0, "mov histogram: number of bins must be greater than 0");
        assert!(win_len > 0, "mov histogram: window length must be greater than 0");
        Self {
            lo,
            hi,
            bin_width: (hi - lo) / num_bins as f64,
            counters: vec![0; num_bins],
            ring: RingQueue::new(win_len),
            win_len,
        }
    }

    /// Add a sample, evicting the oldest once the window is full. Values
    /// outside `[lo, hi]` are clamped into range.
    pub fn add(&mut self, value: f64) {
        let clamped = value.clamp(self.lo, self.hi);

        if self.ring.len() == self.win_len {
            if let Some(old) = self.ring.pop_front() {
                let bin = self.bin_index(old);
                self.counters[bin] = self.counters[bin].saturating_sub(1);
            }
        }

        self.ring.push_back(clamped);
        let bin = self.bin_index(clamped);
        self.counters[bin] += 1;
    }

    /// Counter of the given bin.
    pub fn mov_counter(&self, bin: usize) -> u64 {
        self.counters[bin]
    }

    /// Number of samples currently in the window.
    pub fn n_samples(&self) -> usize {
        self.ring.len()
    }

    /// Quantile estimate for `q` in [0, 1]: the upper edge of the first bin
    /// where the cumulative count reaches `ceil(n * q)`.
    pub fn mov_quantile(&self, q: f64) -> f64 {
        let n = self.ring.len();
        if n == 0 {
            return self.lo;
        }
        let rank = ((n as f64 * q).ceil() as u64).max(1);

        let mut cumulative = 0;
        for (i, &c) in self.counters.iter().enumerate() {
            cumulative += c;
            if cumulative >= rank {
                return self.lo + self.bin_width * (i + 1) as f64;
            }
        }
        self.hi
    }

    fn bin_index(&self, value: f64) -> usize {
        let idx = ((value - self.lo) / self.bin_width) as usize;
        idx.min(self.counters.len() - 1)
    }
}
