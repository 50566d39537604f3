//! Audio frame processing: packetizing, depacketizing, resampling, mixing,
//! stream health monitoring and latency tuning.

pub mod depacketizer;
pub mod latency;
pub mod mixer;
pub mod packetizer;
pub mod plc;
pub mod resampler;
pub mod sink;
pub mod watchdog;

pub use depacketizer::Depacketizer;
pub use latency::{LatencyConfig, LatencyTuner, LatencyTunerBackend, LatencyTunerProfile};
pub use mixer::Mixer;
pub use packetizer::Packetizer;
pub use plc::{PlcPlugin, ZeroPlc};
pub use resampler::{Resampler, ResamplerBackend, ResamplerProfile};
pub use sink::{sink_ring, SinkConsumer, SinkProducer};
pub use watchdog::{Watchdog, WatchdogConfig};

use crate::core::time::Nanos;
use crate::core::Status;

/// Block of interleaved f32 samples moving through the frame chain.
#[derive(Debug, Default, Clone)]
pub struct Frame {
    /// Interleaved samples, all channels.
    pub samples: Vec<f32>,
    /// Capture timestamp of the first sample; 0 when unknown.
    pub capture_ts: Nanos,
    /// Interleaved samples that were filled in for missing data.
    pub n_missing: usize,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepare the frame for `n_samples` interleaved samples of silence.
    pub fn reset(&mut self, n_samples: usize) {
        self.samples.clear();
        self.samples.resize(n_samples, 0.0);
        self.capture_ts = 0;
        self.n_missing = 0;
    }

    /// True when no real signal contributed to the frame.
    pub fn is_blank(&self) -> bool {
        self.n_missing == self.samples.len()
    }
}

/// Uniform pull contract for frame stages.
pub trait FrameReader: Send {
    /// Fill `frame` with `n_samples` interleaved samples.
    fn read(&mut self, frame: &mut Frame, n_samples: usize) -> Result<(), Status>;
}

/// Remap interleaved samples between channel layouts: mono fans out to all
/// output channels, extra input channels are averaged down.
pub fn map_channels(src: &[f32], src_ch: usize, dst: &mut [f32], dst_ch: usize) {
    debug_assert!(src_ch > 0 && dst_ch > 0);
    if src_ch == dst_ch {
        let n = src.len().min(dst.len());
        dst[..n].copy_from_slice(&src[..n]);
        return;
    }
    let frames = (src.len() / src_ch).min(dst.len() / dst_ch);
    for f in 0..frames {
        let src_frame = &src[f * src_ch..(f + 1) * src_ch];
        let dst_frame = &mut dst[f * dst_ch..(f + 1) * dst_ch];
        if src_ch == 1 {
            dst_frame.iter_mut().for_each(|s| *s = src_frame[0]);
        } else {
            let avg = src_frame.iter().sum::<f32>() / src_ch as f32;
            for (i, s) in dst_frame.iter_mut().enumerate() {
                *s = if i < src_ch { src_frame[i] } else { avg };
            }
            if dst_ch < src_ch {
                dst_frame.iter_mut().for_each(|s| *s = avg);
            }
        }
    }
}
