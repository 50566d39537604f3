//! Capture-timestamp injector.
//!
//! Holds a reference pair (capture timestamp, rtp timestamp) refreshed from
//! control feedback, and extrapolates a capture timestamp for every passing
//! packet by converting the modular rtp-timestamp delta to nanoseconds.
//!
//! The injector is owned by the session pipeline thread; mapping updates
//! arrive through the same thread, so no synchronization is needed.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::core::time::Nanos;
use crate::core::{RateLimiter, Status, SECOND};
use crate::packet::{stream_ts_diff, PacketPtr, PacketReader, ReadMode, FLAG_RTP};

use super::encoding::SampleSpec;

const REPORT_INTERVAL: Nanos = 30 * SECOND;

/// Fills the capture timestamp field of rtp packets.
pub struct TimestampInjector {
    reader: Box<dyn PacketReader>,
    sample_spec: SampleSpec,

    has_mapping: bool,
    capture_ts: Nanos,
    rtp_ts: u32,

    n_drops: u64,
    report_limiter: RateLimiter,
}

impl TimestampInjector {
    pub fn new(reader: Box<dyn PacketReader>, sample_spec: SampleSpec) -> Self {
        Self {
            reader,
            sample_spec,
            has_mapping: false,
            capture_ts: 0,
            rtp_ts: 0,
            n_drops: 0,
            report_limiter: RateLimiter::new(REPORT_INTERVAL),
        }
    }

    /// Install a new reference pair. Non-positive capture timestamps are
    /// dropped and counted.
    pub fn update_mapping(&mut self, capture_ts: Nanos, rtp_ts: u32) {
        if self.report_limiter.allow() {
            debug!(
                old_cts = self.capture_ts,
                old_sts = self.rtp_ts,
                new_cts = capture_ts,
                new_sts = rtp_ts,
                has_mapping = self.has_mapping,
                n_drops = self.n_drops,
                "timestamp injector: received mapping"
            );
        }

        if capture_ts <= 0 {
            trace!("timestamp injector: dropping mapping with non-positive cts");
            self.n_drops += 1;
            return;
        }

        self.capture_ts = capture_ts;
        self.rtp_ts = rtp_ts;
        self.has_mapping = true;
    }

    /// Dropped mapping updates so far.
    pub fn n_drops(&self) -> u64 {
        self.n_drops
    }
}

impl PacketReader for TimestampInjector {
    fn read(&mut self, mode: ReadMode) -> Result<PacketPtr, Status> {
        let mut packet = self.reader.read(mode)?;

        debug_assert!(
            packet.has_flags(FLAG_RTP),
            "timestamp injector: unexpected non-rtp packet"
        );

        if self.has_mapping {
            let (capture_ts, rtp_ts, spec) = (self.capture_ts, self.rtp_ts, self.sample_spec);
            let p = Arc::make_mut(&mut packet);
            if let Some(rtp) = p.rtp_mut() {
                let dn = stream_ts_diff(rtp.stream_ts, rtp_ts);
                rtp.capture_ts = capture_ts + spec.ts_delta_to_ns(dn);
            }
        }

        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{FifoQueue, PacketFactory, PacketWriter, RtpInfo};

    fn queue_with_ts(factory: &PacketFactory, timestamps: &[u32]) -> FifoQueue {
        let mut q = FifoQueue::new();
        for (i, &ts) in timestamps.iter().enumerate() {
            let mut p = factory.new_packet().unwrap();
            p.set_rtp(RtpInfo {
                seqnum: i as u16,
                stream_ts: ts,
                ..Default::default()
            });
            q.write(Arc::new(p)).unwrap();
        }
        q
    }

    #[test]
    fn test_no_mapping_leaves_zero() {
        let factory = PacketFactory::new(64, 8);
        let q = queue_with_ts(&factory, &[100, 200]);
        let mut inj = TimestampInjector::new(Box::new(q), SampleSpec::new(48000, 2));

        let p = inj.read(ReadMode::Fetch).unwrap();
        assert_eq!(p.rtp().unwrap().capture_ts, 0);
    }

    #[test]
    fn test_linear_mapping() {
        let factory = PacketFactory::new(64, 16);
        let base_rtp = 2222u32;
        let base_cts = 1_000_000_000i64;
        let spec = SampleSpec::new(48000, 2);

        let mut timestamps = Vec::new();
        let start = base_rtp.wrapping_sub(4444);
        for i in 0..8u32 {
            timestamps.push(start.wrapping_add(i * 128));
        }
        let q = queue_with_ts(&factory, &timestamps);
        let mut inj = TimestampInjector::new(Box::new(q), spec);
        inj.update_mapping(base_cts, base_rtp);

        for &ts in &timestamps {
            let p = inj.read(ReadMode::Fetch).unwrap();
            let expected = base_cts
                + stream_ts_diff(ts, base_rtp) as i128 as i64 * 1_000_000_000 / 48000;
            let got = p.rtp().unwrap().capture_ts;
            let period = 1_000_000_000 / 48000;
            assert!(
                (got - expected).abs() <= period,
                "cts {got} vs expected {expected}"
            );
        }
    }

    #[test]
    fn test_peek_matches_fetch() {
        let factory = PacketFactory::new(64, 8);
        let q = queue_with_ts(&factory, &[2222]);
        let mut inj = TimestampInjector::new(Box::new(q), SampleSpec::new(48000, 2));
        inj.update_mapping(1_000_000_000, 2222);

        let peeked = inj.read(ReadMode::Peek).unwrap();
        assert_eq!(peeked.rtp().unwrap().capture_ts, 1_000_000_000);

        let fetched = inj.read(ReadMode::Fetch).unwrap();
        assert_eq!(
            fetched.rtp().unwrap().capture_ts,
            peeked.rtp().unwrap().capture_ts
        );
    }

    #[test]
    fn test_non_positive_mapping_dropped() {
        let factory = PacketFactory::new(64, 8);
        let q = queue_with_ts(&factory, &[0]);
        let mut inj = TimestampInjector::new(Box::new(q), SampleSpec::new(48000, 2));

        inj.update_mapping(0, 10);
        inj.update_mapping(-5, 10);
        assert_eq!(inj.n_drops(), 2);

        let p = inj.read(ReadMode::Fetch).unwrap();
        assert_eq!(p.rtp().unwrap().capture_ts, 0);
    }

    #[test]
    fn test_mapping_behind_packet() {
        // packets whose rtp ts is before the reference still map linearly
        let factory = PacketFactory::new(64, 8);
        let q = queue_with_ts(&factory, &[1000]);
        let spec = SampleSpec::new(48000, 1);
        let mut inj = TimestampInjector::new(Box::new(q), spec);
        inj.update_mapping(5_000_000_000, 49000);

        let p = inj.read(ReadMode::Fetch).unwrap();
        // 48000 samples behind the reference = exactly one second
        assert_eq!(p.rtp().unwrap().capture_ts, 4_000_000_000);
    }
}
