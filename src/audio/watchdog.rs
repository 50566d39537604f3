//! Stream health watchdog.
//!
//! Watches the frames produced by a session and terminates it when playback
//! is dead (nothing but silence for too long) or choppy (continuous
//! stuttering for too long). Time advances with the frames themselves, so
//! the checks follow the pipeline clock.

use tracing::warn;

use crate::core::time::Nanos;
use crate::core::{Status, MILLISECOND, SECOND};
use crate::rtp::SampleSpec;

use super::{Frame, FrameReader};

/// Watchdog timeouts; negative values disable a check.
#[derive(Debug, Clone, Copy)]
pub struct WatchdogConfig {
    /// Terminate when no samples were played for this long.
    pub no_playback_timeout: Nanos,
    /// Terminate when playback kept stuttering for this long.
    pub choppy_playback_timeout: Nanos,
    /// A glitch-free stretch of this length ends a stutter span.
    pub choppy_playback_window: Nanos,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            no_playback_timeout: 2 * SECOND,
            choppy_playback_timeout: 2 * SECOND,
            choppy_playback_window: 300 * MILLISECOND,
        }
    }
}

/// Dead/choppy stream detector.
pub struct Watchdog {
    inner: Box<dyn FrameReader>,
    config: WatchdogConfig,
    spec: SampleSpec,

    /// Pipeline position in nanoseconds, advanced by frame durations.
    position: Nanos,
    /// Position of the last frame that carried any signal.
    last_signal: Nanos,
    /// Start of the current stutter span, if any.
    choppy_since: Option<Nanos>,
    /// Position of the last glitched frame.
    last_glitch: Nanos,
}

impl Watchdog {
    pub fn new(inner: Box<dyn FrameReader>, config: WatchdogConfig, spec: SampleSpec) -> Self {
        Self {
            inner,
            config,
            spec,
            position: 0,
            last_signal: 0,
            choppy_since: None,
            last_glitch: 0,
        }
    }

    fn check(&mut self, frame: &Frame) -> Result<(), Status> {
        let n_frames = frame.samples.len() / self.spec.channels as usize;
        self.position += self.spec.samples_to_ns(n_frames as u32);

        if frame.is_blank() {
            if self.config.no_playback_timeout >= 0
                && self.position - self.last_signal >= self.config.no_playback_timeout
            {
                warn!(
                    timeout = self.config.no_playback_timeout,
                    "watchdog: no playback timeout reached, terminating session"
                );
                return Err(Status::Abort);
            }
        } else {
            self.last_signal = self.position;
        }

        if self.config.choppy_playback_timeout >= 0 {
            let glitched = frame.n_missing > 0 && !frame.is_blank();
            if glitched {
                self.last_glitch = self.position;
                if self.choppy_since.is_none() {
                    self.choppy_since = Some(self.position);
                }
            } else if self.choppy_since.is_some()
                && self.position - self.last_glitch >= self.config.choppy_playback_window
            {
                self.choppy_since = None;
            }

            if let Some(since) = self.choppy_since {
                if self.position - since >= self.config.choppy_playback_timeout {
                    warn!(
                        timeout = self.config.choppy_playback_timeout,
                        "watchdog: choppy playback timeout reached, terminating session"
                    );
                    return Err(Status::Abort);
                }
            }
        }

        Ok(())
    }
}

impl FrameReader for Watchdog {
    fn read(&mut self, frame: &mut Frame, n_samples: usize) -> Result<(), Status> {
        self.inner.read(frame, n_samples)?;
        self.check(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // source that scripts which frames carry signal and which are glitched
    struct Script {
        // (blank, glitched) per frame
        frames: Vec<(bool, bool)>,
        idx: usize,
    }

    impl FrameReader for Script {
        fn read(&mut self, frame: &mut Frame, n_samples: usize) -> Result<(), Status> {
            frame.reset(n_samples);
            let (blank, glitched) = self.frames[self.idx.min(self.frames.len() - 1)];
            self.idx += 1;
            if blank {
                frame.n_missing = n_samples;
            } else if glitched {
                frame.samples.iter_mut().for_each(|s| *s = 0.1);
                frame.n_missing = n_samples / 4;
            } else {
                frame.samples.iter_mut().for_each(|s| *s = 0.1);
            }
            Ok(())
        }
    }

    const SPEC: SampleSpec = SampleSpec {
        sample_rate: 48000,
        channels: 1,
    };

    // 480 samples at 48 kHz = 10ms per frame
    const FRAME: usize = 480;

    fn watchdog(frames: Vec<(bool, bool)>, config: WatchdogConfig) -> Watchdog {
        Watchdog::new(Box::new(Script { frames, idx: 0 }), config, SPEC)
    }

    #[test]
    fn test_healthy_stream_lives() {
        let mut w = watchdog(vec![(false, false); 400], WatchdogConfig::default());
        let mut frame = Frame::new();
        for _ in 0..400 {
            w.read(&mut frame, FRAME).unwrap();
        }
    }

    #[test]
    fn test_dead_stream_terminates() {
        let mut frames = vec![(false, false); 10];
        frames.extend(vec![(true, false); 300]);
        let mut w = watchdog(frames, WatchdogConfig::default());

        let mut frame = Frame::new();
        let mut status = Ok(());
        for _ in 0..310 {
            status = w.read(&mut frame, FRAME);
            if status.is_err() {
                break;
            }
        }
        assert_eq!(status.err(), Some(Status::Abort));
    }

    #[test]
    fn test_choppy_stream_terminates() {
        // every third frame glitched, forever
        let frames: Vec<(bool, bool)> = (0..400).map(|i| (false, i % 3 == 0)).collect();
        let mut w = watchdog(frames, WatchdogConfig::default());

        let mut frame = Frame::new();
        let mut status = Ok(());
        for _ in 0..400 {
            status = w.read(&mut frame, FRAME);
            if status.is_err() {
                break;
            }
        }
        assert_eq!(status.err(), Some(Status::Abort));
    }

    #[test]
    fn test_brief_stutter_recovers() {
        // a short glitch burst followed by clean playback
        let mut frames = vec![(false, true); 10];
        frames.extend(vec![(false, false); 400]);
        let mut w = watchdog(frames, WatchdogConfig::default());

        let mut frame = Frame::new();
        for _ in 0..410 {
            w.read(&mut frame, FRAME).unwrap();
        }
    }

    #[test]
    fn test_disabled_timeouts() {
        let config = WatchdogConfig {
            no_playback_timeout: -1,
            choppy_playback_timeout: -1,
            choppy_playback_window: 300 * MILLISECOND,
        };
        let mut w = watchdog(vec![(true, false); 500], config);
        let mut frame = Frame::new();
        for _ in 0..500 {
            w.read(&mut frame, FRAME).unwrap();
        }
    }
}
