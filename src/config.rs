//! Peer configuration.
//!
//! All config structs are zero-initializable: `Default` plus zero fields
//! mean "use the built-in default". `resolve()` fills the defaults once at
//! construction so the pipeline stages only ever see final values.

use crate::audio::{LatencyConfig, ResamplerBackend, ResamplerProfile, WatchdogConfig};
use crate::core::time::Nanos;
use crate::core::{Status, MILLISECOND};
use crate::fec::{BlockReaderConfig, BlockWriterConfig, FecScheme};
use crate::rtp::FilterConfig;

/// What paces frame reads/writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockSource {
    /// A CPU timer inside the peer paces frames at the nominal rate.
    #[default]
    Internal,
    /// The caller's own clock paces frames.
    External,
}

/// FEC encoding selection for a sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FecEncoding {
    /// Choose from the connected endpoints (rs8m when in doubt).
    #[default]
    FromEndpoints,
    None,
    Rs8m,
    Ldpc,
}

impl FecEncoding {
    pub fn scheme(&self) -> Option<FecScheme> {
        match self {
            FecEncoding::FromEndpoints => None,
            FecEncoding::None => None,
            FecEncoding::Rs8m => Some(FecScheme::Rs8m),
            FecEncoding::Ldpc => Some(FecScheme::LdpcStaircase),
        }
    }
}

const DEFAULT_PACKET_LENGTH: Nanos = 7 * MILLISECOND;
const DEFAULT_MAX_PACKET_SIZE: usize = 2048;
const DEFAULT_MAX_FRAME_SIZE: usize = 4096;
const DEFAULT_MAX_PACKETS: usize = 4096;

/// Receiver peer configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReceiverConfig {
    pub clock_source: ClockSource,
    pub latency: LatencyConfig,
    pub watchdog: WatchdogConfig,
    pub filter: FilterConfig,
    pub fec_reader: BlockReaderConfig,
    pub resampler_backend: ResamplerBackend,
    pub resampler_profile: ResamplerProfile,
    /// Largest accepted packet, in bytes; 0 selects the default.
    pub max_packet_size: usize,
    /// Largest frame passed through the chain, in bytes; 0 selects the
    /// default.
    pub max_frame_size: usize,
    /// Sample rate of frames returned to the caller; 0 selects 44100.
    pub frame_rate: u32,
    /// Channel count of frames returned to the caller; 0 selects stereo.
    pub frame_channels: u16,
}

impl ReceiverConfig {
    pub fn resolve(mut self) -> Result<Self, Status> {
        self.latency = self.latency.resolve()?;
        if self.max_packet_size == 0 {
            self.max_packet_size = DEFAULT_MAX_PACKET_SIZE;
        }
        if self.max_frame_size == 0 {
            self.max_frame_size = DEFAULT_MAX_FRAME_SIZE;
        }
        if self.frame_rate == 0 {
            self.frame_rate = 44100;
        }
        if self.frame_channels == 0 {
            self.frame_channels = 2;
        }
        Ok(self)
    }

    /// Sample spec of frames returned to the caller.
    pub fn frame_spec(&self) -> crate::rtp::SampleSpec {
        crate::rtp::SampleSpec::new(self.frame_rate, self.frame_channels)
    }

    /// Largest frame in interleaved f32 samples.
    pub fn max_frame_samples(&self) -> usize {
        self.max_frame_size / std::mem::size_of::<f32>()
    }

    pub fn max_packets(&self) -> usize {
        DEFAULT_MAX_PACKETS
    }
}

/// Sender peer configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct SenderConfig {
    pub clock_source: ClockSource,
    pub fec_encoding: FecEncoding,
    pub fec_writer: BlockWriterConfig,
    /// Payload type of the outgoing stream; 0 selects L16/44100 stereo.
    pub payload_type: u8,
    /// Duration of each produced packet; 0 selects the default.
    pub packet_length: Nanos,
    /// Largest produced packet, in bytes; 0 selects the default.
    pub max_packet_size: usize,
    /// Largest accepted frame, in bytes; 0 selects the default.
    pub max_frame_size: usize,
    /// Interval between sender reports; 0 selects the default.
    pub report_interval: Nanos,
}

impl SenderConfig {
    pub fn resolve(mut self) -> Result<Self, Status> {
        if self.packet_length < 0 || self.report_interval < 0 {
            return Err(Status::BadConfig);
        }
        if self.packet_length == 0 {
            self.packet_length = DEFAULT_PACKET_LENGTH;
        }
        if self.max_packet_size == 0 {
            self.max_packet_size = DEFAULT_MAX_PACKET_SIZE;
        }
        if self.max_frame_size == 0 {
            self.max_frame_size = DEFAULT_MAX_FRAME_SIZE;
        }
        if self.report_interval == 0 {
            self.report_interval = 200 * MILLISECOND;
        }
        if self.payload_type == 0 {
            self.payload_type = 10;
        }
        Ok(self)
    }

    pub fn max_packets(&self) -> usize {
        DEFAULT_MAX_PACKETS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_config_resolves_to_defaults() {
        let r = ReceiverConfig::default().resolve().unwrap();
        assert_eq!(r.max_packet_size, DEFAULT_MAX_PACKET_SIZE);
        assert_eq!(r.max_frame_samples(), 1024);
        assert!(r.latency.target_latency > 0);

        let s = SenderConfig::default().resolve().unwrap();
        assert_eq!(s.packet_length, 7 * MILLISECOND);
        assert_eq!(s.report_interval, 200 * MILLISECOND);
    }

    #[test]
    fn test_negative_rejected() {
        let s = SenderConfig {
            packet_length: -1,
            ..Default::default()
        };
        assert_eq!(s.resolve().err(), Some(Status::BadConfig));
    }
}
