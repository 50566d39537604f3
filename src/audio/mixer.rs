//! Mixer: sums session outputs into one frame.
//!
//! Sessions may enter and leave the mix at any frame boundary. The sum is
//! soft-clamped to [-1, 1]; the mixed frame carries the earliest capture
//! timestamp of its inputs so end-to-end latency stays measurable.

use crate::core::Status;

use super::{Frame, FrameReader};

/// Sample-accurate frame mixer.
pub struct Mixer {
    temp: Frame,
}

impl Mixer {
    pub fn new() -> Self {
        Self { temp: Frame::new() }
    }

    /// Mix `n_samples` from every reader into `out`. Readers that fail with
    /// a fatal status are reported through the returned vector so the
    /// caller can terminate their sessions; `Drain` contributes silence.
    pub fn mix(
        &mut self,
        readers: &mut [&mut dyn FrameReader],
        out: &mut Frame,
        n_samples: usize,
    ) -> Vec<(usize, Status)> {
        out.reset(n_samples);
        out.n_missing = n_samples;
        let mut failures = Vec::new();

        for (idx, reader) in readers.iter_mut().enumerate() {
            match reader.read(&mut self.temp, n_samples) {
                Ok(()) => {
                    for (o, s) in out.samples.iter_mut().zip(self.temp.samples.iter()) {
                        *o = (*o + *s).clamp(-1.0, 1.0);
                    }
                    out.n_missing = out.n_missing.min(self.temp.n_missing);
                    if self.temp.capture_ts > 0
                        && (out.capture_ts == 0 || self.temp.capture_ts < out.capture_ts)
                    {
                        out.capture_ts = self.temp.capture_ts;
                    }
                }
                Err(Status::Drain) => {}
                Err(status) => failures.push((idx, status)),
            }
        }
        failures
    }
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new()
    }
}
