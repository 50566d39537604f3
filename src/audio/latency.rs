//! Latency estimation and playback clock tuning.
//!
//! The NIQ backend estimates how much media is buffered on the receiver:
//! packet durations still in the incoming queue plus samples held by the
//! depacketizer. The tuner smooths the estimate over a sliding window,
//! derives a resampling scale that steers it toward the target, and signals
//! termination when the estimate stays outside the tolerance bounds.

use tracing::{debug, warn};

use crate::core::time::Nanos;
use crate::core::{Status, MILLISECOND, SECOND};
use crate::stat::MovStats;

/// Latency estimation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LatencyTunerBackend {
    /// Network incoming queue length.
    #[default]
    Niq,
}

/// How aggressively the tuner adjusts the playback clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LatencyTunerProfile {
    /// Select responsive or gradual based on the target latency.
    #[default]
    Auto,
    /// No clock adjustment; bounds checking only.
    Intact,
    /// Fast convergence, for low-latency targets.
    Responsive,
    /// Slow smooth convergence, for larger targets.
    Gradual,
}

/// Latency tuning parameters; zero fields select defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatencyConfig {
    pub tuner_backend: LatencyTunerBackend,
    pub tuner_profile: LatencyTunerProfile,
    /// Target latency; 0 selects the default.
    pub target_latency: Nanos,
    /// Allowed deviation from the target; 0 selects the default.
    pub latency_tolerance: Nanos,
    /// Starting target for adaptive mode; 0 selects the default.
    pub start_target_latency: Nanos,
    pub min_target_latency: Nanos,
    pub max_target_latency: Nanos,
}

const DEFAULT_TARGET: Nanos = 200 * MILLISECOND;

// Bounds violations must persist this long before the session terminates.
const BOUND_HYSTERESIS: Nanos = 200 * MILLISECOND;

// Smoothing window over latency samples.
const SMOOTHING_WINDOW: usize = 100;

// Targets below this are considered low-latency and get the responsive
// profile in auto mode.
const RESPONSIVE_THRESHOLD: Nanos = 30 * MILLISECOND;

impl LatencyConfig {
    /// Fill in defaults for zero fields.
    pub fn resolve(mut self) -> Result<Self, Status> {
        if self.target_latency < 0 || self.latency_tolerance < 0 {
            return Err(Status::BadConfig);
        }
        if self.target_latency == 0 {
            self.target_latency = if self.start_target_latency > 0 {
                self.start_target_latency
            } else {
                DEFAULT_TARGET
            };
        }
        if self.min_target_latency > 0 && self.target_latency < self.min_target_latency {
            self.target_latency = self.min_target_latency;
        }
        if self.max_target_latency > 0 && self.target_latency > self.max_target_latency {
            self.target_latency = self.max_target_latency;
        }
        if self.latency_tolerance == 0 {
            self.latency_tolerance = (self.target_latency / 2).clamp(50 * MILLISECOND, 5 * SECOND);
        }
        if self.tuner_profile == LatencyTunerProfile::Auto {
            self.tuner_profile = if self.target_latency < RESPONSIVE_THRESHOLD {
                LatencyTunerProfile::Responsive
            } else {
                LatencyTunerProfile::Gradual
            };
        }
        Ok(self)
    }
}

/// Per-session latency tuner (NIQ backend).
pub struct LatencyTuner {
    profile: LatencyTunerProfile,
    target: Nanos,
    tolerance: Nanos,

    stats: MovStats,
    scale: f64,

    /// Bounds are enforced once the estimate reached the target region.
    bounds_active: bool,
    overrun_since: Option<Nanos>,
}

impl LatencyTuner {
    pub fn new(config: &LatencyConfig) -> Self {
        debug_assert!(config.target_latency > 0, "latency config must be resolved");
        Self {
            profile: config.tuner_profile,
            target: config.target_latency,
            tolerance: config.latency_tolerance,
            stats: MovStats::new(SMOOTHING_WINDOW),
            scale: 1.0,
            bounds_active: false,
            overrun_since: None,
        }
    }

    /// Current resampling scale.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Smoothed latency estimate.
    pub fn estimate(&self) -> Nanos {
        self.stats.mov_avg() as Nanos
    }

    /// Short-term variation of the latency estimate.
    pub fn jitter(&self) -> Nanos {
        self.stats.mov_var() as Nanos
    }

    pub fn target(&self) -> Nanos {
        self.target
    }

    /// Feed a latency sample taken at pipeline position `position`.
    /// Returns `Abort` when the estimate stayed out of bounds for longer
    /// than the hysteresis window.
    pub fn update(&mut self, niq_latency: Nanos, position: Nanos) -> Result<(), Status> {
        self.stats.add(niq_latency as f64);
        let estimate = self.stats.mov_avg() as Nanos;

        let deviation = estimate - self.target;

        if !self.bounds_active {
            if deviation.abs() <= self.tolerance {
                self.bounds_active = true;
                debug!(
                    estimate,
                    target = self.target,
                    "latency tuner: reached target region"
                );
            }
        } else if deviation.abs() > self.tolerance {
            let since = *self.overrun_since.get_or_insert(position);
            if position - since >= BOUND_HYSTERESIS {
                warn!(
                    estimate,
                    target = self.target,
                    tolerance = self.tolerance,
                    "latency tuner: latency out of bounds, terminating session"
                );
                return Err(Status::Abort);
            }
        } else {
            self.overrun_since = None;
        }

        let (gain, max_delta) = match self.profile {
            LatencyTunerProfile::Intact => {
                self.scale = 1.0;
                return Ok(());
            }
            LatencyTunerProfile::Responsive => (0.05, 0.005),
            LatencyTunerProfile::Gradual | LatencyTunerProfile::Auto => (0.01, 0.001),
        };

        let delta = gain * deviation as f64 / self.target as f64;
        self.scale = 1.0 + delta.clamp(-max_delta, max_delta);
        Ok(())
    }
}

/// NIQ latency estimate from queue contents.
pub fn niq_latency(
    queued_samples: u64,
    held_samples: u64,
    sample_rate: u32,
) -> Nanos {
    crate::core::time::samples_to_ns(queued_samples + held_samples, sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(target: Nanos) -> LatencyConfig {
        LatencyConfig {
            target_latency: target,
            ..Default::default()
        }
        .resolve()
        .unwrap()
    }

    #[test]
    fn test_resolve_defaults() {
        let c = LatencyConfig::default().resolve().unwrap();
        assert_eq!(c.target_latency, DEFAULT_TARGET);
        assert_eq!(c.latency_tolerance, 100 * MILLISECOND);
        assert_eq!(c.tuner_profile, LatencyTunerProfile::Gradual);

        let low = resolved(10 * MILLISECOND);
        assert_eq!(low.tuner_profile, LatencyTunerProfile::Responsive);
        assert_eq!(low.latency_tolerance, 50 * MILLISECOND);
    }

    #[test]
    fn test_scale_tracks_deviation() {
        let mut tuner = LatencyTuner::new(&resolved(100 * MILLISECOND));

        // latency above target: consume faster
        for i in 0..200 {
            tuner
                .update(150 * MILLISECOND, i * 10 * MILLISECOND)
                .unwrap();
        }
        assert!(tuner.scale() > 1.0);

        // latency below target: consume slower
        let mut tuner = LatencyTuner::new(&resolved(100 * MILLISECOND));
        for i in 0..200 {
            tuner
                .update(60 * MILLISECOND, i * 10 * MILLISECOND)
                .unwrap();
        }
        assert!(tuner.scale() < 1.0);
    }

    #[test]
    fn test_intact_profile_keeps_unity() {
        let config = LatencyConfig {
            target_latency: 100 * MILLISECOND,
            tuner_profile: LatencyTunerProfile::Intact,
            ..Default::default()
        }
        .resolve()
        .unwrap();
        let mut tuner = LatencyTuner::new(&config);
        for i in 0..100 {
            tuner
                .update(180 * MILLISECOND, i * 10 * MILLISECOND)
                .unwrap();
        }
        assert_eq!(tuner.scale(), 1.0);
    }

    #[test]
    fn test_sustained_overrun_aborts() {
        let mut tuner = LatencyTuner::new(&resolved(100 * MILLISECOND));
        let mut position = 0;

        // warm up into the target region
        for _ in 0..SMOOTHING_WINDOW {
            position += 10 * MILLISECOND;
            tuner.update(100 * MILLISECOND, position).unwrap();
        }

        // drift far beyond tolerance and stay there
        let mut status = Ok(());
        for _ in 0..SMOOTHING_WINDOW * 2 {
            position += 10 * MILLISECOND;
            status = tuner.update(400 * MILLISECOND, position);
            if status.is_err() {
                break;
            }
        }
        assert_eq!(status.err(), Some(Status::Abort));
    }

    #[test]
    fn test_bounds_inactive_during_warmup() {
        // a fresh session starts far below target; no abort
        let mut tuner = LatencyTuner::new(&resolved(100 * MILLISECOND));
        for i in 0..300 {
            tuner.update(0, i * 10 * MILLISECOND).unwrap();
        }
    }

    #[test]
    fn test_niq_latency() {
        assert_eq!(niq_latency(4410, 0, 44100), 100 * MILLISECOND);
        assert_eq!(niq_latency(2205, 2205, 44100), 100 * MILLISECOND);
    }
}
