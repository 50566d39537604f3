//! Packet encoding registry and PCM sample conversion.
//!
//! Built-in encodings follow the RTP audio/video profile: L16 big-endian at
//! 44100 Hz, stereo (payload type 10) and mono (payload type 11). User
//! encodings register in the dynamic range 100..=127.

use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::core::time::{samples_to_ns, Nanos};
use crate::core::Status;

/// Sample rate and channel layout of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

impl SampleSpec {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Samples-per-channel in the given duration.
    pub fn ns_to_samples(&self, ns: Nanos) -> u32 {
        crate::core::time::ns_to_samples(ns, self.sample_rate) as u32
    }

    /// Duration of the given samples-per-channel count.
    pub fn samples_to_ns(&self, samples: u32) -> Nanos {
        samples_to_ns(samples as u64, self.sample_rate)
    }

    /// Signed stream-timestamp delta converted to nanoseconds.
    pub fn ts_delta_to_ns(&self, delta: i64) -> Nanos {
        if self.sample_rate == 0 {
            return 0;
        }
        (delta as i128 * crate::core::SECOND as i128 / self.sample_rate as i128) as Nanos
    }
}

/// A registered packet encoding: L16 PCM at a fixed rate/layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encoding {
    pub payload_type: u8,
    pub spec: SampleSpec,
}

impl Encoding {
    /// Bytes per interleaved sample frame (all channels).
    pub fn frame_bytes(&self) -> usize {
        2 * self.spec.channels as usize
    }

    /// Samples-per-channel carried by a payload of `len` bytes.
    pub fn payload_to_samples(&self, len: usize) -> u32 {
        (len / self.frame_bytes()) as u32
    }

    /// Payload bytes needed for `samples` samples-per-channel.
    pub fn samples_to_payload(&self, samples: u32) -> usize {
        samples as usize * self.frame_bytes()
    }

    /// Decode L16 big-endian payload into interleaved f32 samples.
    /// Returns the number of f32 values written.
    pub fn decode(&self, payload: &[u8], out: &mut [f32]) -> usize {
        let n = (payload.len() / 2).min(out.len());
        for i in 0..n {
            let s = i16::from_be_bytes([payload[i * 2], payload[i * 2 + 1]]);
            out[i] = s as f32 / 32768.0;
        }
        n
    }

    /// Encode interleaved f32 samples into L16 big-endian payload.
    pub fn encode(&self, samples: &[f32], out: &mut Vec<u8>) {
        out.reserve(samples.len() * 2);
        for &s in samples {
            let clamped = (s.clamp(-1.0, 1.0) * 32768.0).round();
            let v = if clamped >= 32767.0 {
                32767i16
            } else if clamped <= -32768.0 {
                -32768i16
            } else {
                clamped as i16
            };
            out.extend_from_slice(&v.to_be_bytes());
        }
    }
}

lazy_static! {
    static ref BUILTIN_ENCODINGS: HashMap<u8, Encoding> = {
        let mut m = HashMap::new();
        m.insert(
            10,
            Encoding {
                payload_type: 10,
                spec: SampleSpec::new(44100, 2),
            },
        );
        m.insert(
            11,
            Encoding {
                payload_type: 11,
                spec: SampleSpec::new(44100, 1),
            },
        );
        m
    };
}

/// Per-context encoding registry: built-ins plus user registrations.
#[derive(Default)]
pub struct EncodingMap {
    user: HashMap<u8, Encoding>,
}

impl EncodingMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user encoding with a payload type in 100..=127.
    pub fn register(&mut self, encoding: Encoding) -> Result<(), Status> {
        if !(100..=127).contains(&encoding.payload_type) {
            return Err(Status::BadConfig);
        }
        if encoding.spec.sample_rate == 0 || encoding.spec.channels == 0 {
            return Err(Status::BadConfig);
        }
        if self.user.contains_key(&encoding.payload_type) {
            return Err(Status::BadConfig);
        }
        self.user.insert(encoding.payload_type, encoding);
        Ok(())
    }

    /// Look up a payload type among user and built-in encodings.
    pub fn find(&self, payload_type: u8) -> Option<Encoding> {
        self.user
            .get(&payload_type)
            .or_else(|| BUILTIN_ENCODINGS.get(&payload_type))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        let map = EncodingMap::new();
        let stereo = map.find(10).unwrap();
        assert_eq!(stereo.spec, SampleSpec::new(44100, 2));
        let mono = map.find(11).unwrap();
        assert_eq!(mono.spec, SampleSpec::new(44100, 1));
        assert!(map.find(96).is_none());
    }

    #[test]
    fn test_user_registration() {
        let mut map = EncodingMap::new();
        let enc = Encoding {
            payload_type: 100,
            spec: SampleSpec::new(48000, 2),
        };
        map.register(enc).unwrap();
        assert_eq!(map.find(100).unwrap(), enc);

        // duplicate and out-of-range registrations fail
        assert_eq!(map.register(enc).err(), Some(Status::BadConfig));
        let bad = Encoding {
            payload_type: 10,
            spec: SampleSpec::new(48000, 2),
        };
        assert_eq!(map.register(bad).err(), Some(Status::BadConfig));
    }

    #[test]
    fn test_pcm_roundtrip() {
        let enc = Encoding {
            payload_type: 10,
            spec: SampleSpec::new(44100, 2),
        };
        let samples: Vec<f32> = (0..64).map(|i| (i as f32 - 32.0) / 64.0).collect();
        let mut payload = Vec::new();
        enc.encode(&samples, &mut payload);
        assert_eq!(payload.len(), 128);

        let mut decoded = vec![0.0f32; 64];
        let n = enc.decode(&payload, &mut decoded);
        assert_eq!(n, 64);
        for (a, b) in samples.iter().zip(decoded.iter()) {
            assert!((a - b).abs() < 1.0 / 32768.0 + 1e-6);
        }
    }

    #[test]
    fn test_payload_sizing() {
        let enc = Encoding {
            payload_type: 10,
            spec: SampleSpec::new(44100, 2),
        };
        assert_eq!(enc.payload_to_samples(176), 44);
        assert_eq!(enc.samples_to_payload(44), 176);
    }
}
