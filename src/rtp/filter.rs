//! RTP validation filter.
//!
//! Sits between the raw packet source and the rest of the session chain.
//! Enforces payload-type and source-id stability, caps seqnum and timestamp
//! jumps, and fills missing packet durations from the payload size. Invalid
//! packets are dropped silently and counted; the session decides what to do
//! about persistent mismatches.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::{RateLimiter, Status, SECOND};
use crate::packet::{
    seqnum_diff, stream_ts_diff, PacketPtr, PacketReader, ReadMode, FLAG_AUDIO, FLAG_RTP,
};

use super::encoding::Encoding;

/// Filter parameters.
#[derive(Debug, Clone, Copy)]
pub struct FilterConfig {
    /// Maximum allowed seqnum jump between adjacent packets.
    pub max_sn_jump: u32,
    /// Maximum allowed stream-timestamp jump, in nanoseconds.
    pub max_ts_jump_ns: i64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            max_sn_jump: 100,
            max_ts_jump_ns: SECOND,
        }
    }
}

/// Per-packet drop counters, exposed to session metrics.
#[derive(Debug, Default, Clone, Copy)]
pub struct FilterStats {
    pub accepted: u64,
    pub dropped_flags: u64,
    pub dropped_stream_change: u64,
    pub dropped_jump: u64,
    pub dropped_cts: u64,
    /// Packets the seqnum space says should have arrived so far.
    pub expected: u64,
}

/// RTP stream validator; transparent in peek mode.
pub struct Filter {
    reader: Box<dyn PacketReader>,
    config: FilterConfig,
    encoding: Encoding,
    max_ts_jump: i64,

    started: bool,
    payload_type: u8,
    source_id: u32,
    prev_seqnum: u16,
    prev_stream_ts: u32,

    stats: FilterStats,
    drop_limiter: RateLimiter,
}

impl Filter {
    pub fn new(reader: Box<dyn PacketReader>, config: FilterConfig, encoding: Encoding) -> Self {
        let max_ts_jump = encoding
            .spec
            .ns_to_samples(config.max_ts_jump_ns) as i64;
        Self {
            reader,
            config,
            encoding,
            max_ts_jump,
            started: false,
            payload_type: 0,
            source_id: 0,
            prev_seqnum: 0,
            prev_stream_ts: 0,
            stats: FilterStats::default(),
            drop_limiter: RateLimiter::new(5 * SECOND),
        }
    }

    pub fn stats(&self) -> FilterStats {
        self.stats
    }

    fn validate(&mut self, packet: &PacketPtr) -> bool {
        if !packet.has_flags(FLAG_RTP | FLAG_AUDIO) {
            self.stats.dropped_flags += 1;
            return false;
        }
        let rtp = match packet.rtp() {
            Some(rtp) => rtp,
            None => {
                self.stats.dropped_flags += 1;
                return false;
            }
        };

        if self.started {
            if rtp.payload_type != self.payload_type || rtp.source_id != self.source_id {
                self.stats.dropped_stream_change += 1;
                if self.drop_limiter.allow() {
                    debug!(
                        pt = rtp.payload_type,
                        ssrc = rtp.source_id,
                        expected_pt = self.payload_type,
                        expected_ssrc = self.source_id,
                        "rtp filter: payload type or source id changed, dropping"
                    );
                }
                return false;
            }

            let sn_jump = seqnum_diff(rtp.seqnum, self.prev_seqnum).unsigned_abs();
            if sn_jump > self.config.max_sn_jump {
                self.stats.dropped_jump += 1;
                if self.drop_limiter.allow() {
                    warn!(sn_jump, "rtp filter: seqnum jump too large, dropping");
                }
                return false;
            }

            let ts_jump = stream_ts_diff(rtp.stream_ts, self.prev_stream_ts).abs();
            if ts_jump > self.max_ts_jump {
                self.stats.dropped_jump += 1;
                if self.drop_limiter.allow() {
                    warn!(ts_jump, "rtp filter: timestamp jump too large, dropping");
                }
                return false;
            }
        }

        if rtp.capture_ts < 0 {
            self.stats.dropped_cts += 1;
            return false;
        }

        true
    }

    // Record the stream identity and position of an emitted packet, and fill
    // the duration if the packetizer left it empty.
    fn accept(&mut self, mut packet: PacketPtr) -> PacketPtr {
        {
            let p = Arc::make_mut(&mut packet);
            if let Some(rtp) = p.rtp_mut() {
                if rtp.duration == 0 {
                    let len = rtp.payload.len();
                    rtp.duration = self.encoding.payload_to_samples(len);
                }
            }
        }
        let rtp = packet.rtp().unwrap();
        if !self.started {
            self.started = true;
            self.payload_type = rtp.payload_type;
            self.source_id = rtp.source_id;
            self.stats.expected = 1;
        } else {
            let d = seqnum_diff(rtp.seqnum, self.prev_seqnum);
            if d > 0 {
                self.stats.expected += d as u64;
            }
        }
        self.prev_seqnum = rtp.seqnum;
        self.prev_stream_ts = rtp.stream_ts;
        self.stats.accepted += 1;
        packet
    }
}

impl PacketReader for Filter {
    fn read(&mut self, mode: ReadMode) -> Result<PacketPtr, Status> {
        loop {
            let packet = self.reader.read(mode)?;
            if self.validate(&packet) {
                return Ok(match mode {
                    ReadMode::Fetch => self.accept(packet),
                    ReadMode::Peek => packet,
                });
            }
            // drop the invalid packet and keep scanning
            if mode == ReadMode::Peek {
                let _ = self.reader.read(ReadMode::Fetch)?;
            }
        }
    }
}
