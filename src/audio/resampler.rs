//! Builtin resampler with a tunable rate scale.
//!
//! Linear interpolation between adjacent input frames, driven by a scale
//! factor around 1.0: above 1.0 input is consumed faster (draining the
//! queue), below 1.0 slower. The latency tuner nudges the scale to steer
//! the receiver clock toward the sender clock.

use crate::core::Status;
use crate::rtp::SampleSpec;

use super::{Frame, FrameReader};

/// Resampler implementation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResamplerBackend {
    /// Builtin linear interpolation.
    #[default]
    Builtin,
    /// Speex float resampler (not built in).
    Speex,
    /// Speex with decimating pre-stage (not built in).
    Speexdec,
}

/// Quality/latency trade-off of the resampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResamplerProfile {
    Low,
    #[default]
    Medium,
    High,
}

// The input is pulled in chunks of this many frames.
const CHUNK_FRAMES: usize = 64;

// Safety clamp; the tuner stays far inside these bounds.
const MIN_SCALE: f64 = 0.5;
const MAX_SCALE: f64 = 2.0;

/// Scaling frame reader.
pub struct Resampler {
    inner: Box<dyn FrameReader>,
    spec: SampleSpec,
    scale: f64,

    pos: f64,
    prev: Vec<f32>,
    curr: Vec<f32>,
    primed: bool,

    input: Frame,
    /// Next input frame index within `input`.
    input_idx: usize,
    /// Missing-sample ratio carried over from consumed input chunks.
    input_missing: usize,
}

impl Resampler {
    pub fn new(
        backend: ResamplerBackend,
        _profile: ResamplerProfile,
        inner: Box<dyn FrameReader>,
        spec: SampleSpec,
    ) -> Result<Self, Status> {
        if backend != ResamplerBackend::Builtin {
            return Err(Status::BadConfig);
        }
        let channels = spec.channels as usize;
        Ok(Self {
            inner,
            spec,
            scale: 1.0,
            pos: 0.0,
            prev: vec![0.0; channels],
            curr: vec![0.0; channels],
            primed: false,
            input: Frame::new(),
            input_idx: 0,
            input_missing: 0,
        })
    }

    /// Set the rate scale; clamped to a sane range.
    pub fn set_scale(&mut self, scale: f64) {
        self.scale = scale.clamp(MIN_SCALE, MAX_SCALE);
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    fn channels(&self) -> usize {
        self.spec.channels as usize
    }

    // Load the next input frame into `curr`, refilling the chunk buffer
    // from the inner reader when it runs out.
    fn advance_input(&mut self) -> Result<(), Status> {
        let channels = self.channels();
        if self.input_idx * channels >= self.input.samples.len() {
            self.inner.read(&mut self.input, CHUNK_FRAMES * channels)?;
            self.input_idx = 0;
            self.input_missing += self.input.n_missing;
        }
        std::mem::swap(&mut self.prev, &mut self.curr);
        let start = self.input_idx * channels;
        self.curr
            .copy_from_slice(&self.input.samples[start..start + channels]);
        self.input_idx += 1;
        Ok(())
    }
}

impl FrameReader for Resampler {
    fn read(&mut self, frame: &mut Frame, n_samples: usize) -> Result<(), Status> {
        frame.reset(n_samples);
        let channels = self.channels();
        let out_frames = n_samples / channels;

        if !self.primed {
            self.advance_input()?;
            self.advance_input()?;
            frame.capture_ts = self.input.capture_ts;
            self.primed = true;
        } else {
            frame.capture_ts = self.input.capture_ts;
        }

        let mut written = 0;
        for _ in 0..out_frames {
            let t = self.pos as f32;
            for ch in 0..channels {
                frame.samples[written + ch] =
                    self.prev[ch] + (self.curr[ch] - self.prev[ch]) * t;
            }
            written += channels;

            self.pos += self.scale;
            while self.pos >= 1.0 {
                self.pos -= 1.0;
                self.advance_input()?;
            }
        }

        // propagate the loss ratio of the consumed input
        frame.n_missing = self.input_missing.min(n_samples);
        self.input_missing = 0;
        Ok(())
    }
}
