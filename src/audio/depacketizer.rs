//! Depacketizer: turns the packet stream into a continuous sample stream.
//!
//! Pulls packets on demand, decodes PCM payloads, and fills gaps left by
//! unrecovered losses through the loss concealment hook. Late packets that
//! fall entirely behind the playhead are dropped; partially late packets
//! contribute their tail.

use tracing::debug;

use crate::core::time::Nanos;
use crate::core::Status;
use crate::packet::{stream_ts_diff, PacketPtr, PacketReader, ReadMode};
use crate::rtp::Encoding;

use super::plc::{PlcPlugin, ZeroPlc};
use super::{Frame, FrameReader};

const HISTORY_FRAMES: usize = 256;

/// Counters exposed to session metrics.
#[derive(Debug, Default, Clone, Copy)]
pub struct DepacketizerStats {
    pub fetched_packets: u64,
    pub late_packets: u64,
    pub decoded_samples: u64,
    pub missing_samples: u64,
}

/// PCM decoder stage; sample-spec aware.
pub struct Depacketizer {
    reader: Box<dyn PacketReader>,
    encoding: Encoding,
    plc: Box<dyn PlcPlugin>,

    packet: Option<PacketPtr>,
    /// Samples-per-channel already consumed from the current packet.
    packet_pos: u32,
    /// Gap (samples-per-channel) to conceal before the current packet.
    pending_gap: u32,

    started: bool,
    /// Stream timestamp of the next sample to emit.
    next_ts: u32,

    history: Vec<f32>,
    stats: DepacketizerStats,
}

impl Depacketizer {
    pub fn new(reader: Box<dyn PacketReader>, encoding: Encoding) -> Self {
        Self {
            reader,
            encoding,
            plc: Box::new(ZeroPlc),
            packet: None,
            packet_pos: 0,
            pending_gap: 0,
            started: false,
            next_ts: 0,
            history: Vec::new(),
            stats: DepacketizerStats::default(),
        }
    }

    /// Install a loss concealment plugin in place of the silence default.
    pub fn set_plc(&mut self, plc: Box<dyn PlcPlugin>) {
        self.plc = plc;
    }

    pub fn stats(&self) -> DepacketizerStats {
        self.stats
    }

    /// Samples-per-channel decoded but not yet emitted, for the latency
    /// estimator.
    pub fn held_samples(&self) -> u64 {
        match (&self.packet, self.packet.as_ref().and_then(|p| p.rtp())) {
            (Some(_), Some(rtp)) => (rtp.duration.saturating_sub(self.packet_pos)) as u64,
            _ => 0,
        }
    }

    fn channels(&self) -> usize {
        self.encoding.spec.channels as usize
    }

    // Fetch the next usable packet; resolves ordering against the playhead.
    fn next_packet(&mut self) -> Result<bool, Status> {
        loop {
            let packet = match self.reader.read(ReadMode::Fetch) {
                Ok(p) => p,
                Err(Status::Drain) | Err(Status::NoData) => return Ok(false),
                Err(status) => return Err(status),
            };
            let rtp = match packet.rtp() {
                Some(rtp) if rtp.duration > 0 => rtp.clone(),
                _ => continue,
            };
            self.stats.fetched_packets += 1;

            if !self.started {
                self.started = true;
                self.next_ts = rtp.stream_ts;
            }

            let d = stream_ts_diff(rtp.stream_ts, self.next_ts);
            if d < 0 {
                if d + rtp.duration as i64 <= 0 {
                    // entirely behind the playhead
                    self.stats.late_packets += 1;
                    debug!(
                        seqnum = rtp.seqnum,
                        behind = -d,
                        "depacketizer: dropping late packet"
                    );
                    continue;
                }
                // partially late; skip the overlap
                self.packet_pos = (-d) as u32;
                self.pending_gap = 0;
            } else {
                self.packet_pos = 0;
                self.pending_gap = d as u32;
            }
            self.packet = Some(packet);
            return Ok(true);
        }
    }

    fn push_history(&mut self, samples: &[f32]) {
        let cap = HISTORY_FRAMES * self.channels();
        self.history.extend_from_slice(samples);
        if self.history.len() > cap {
            let cut = self.history.len() - cap;
            self.history.drain(..cut);
        }
    }

    // Capture timestamp of the sample at `next_ts`, from the current packet.
    fn playhead_capture_ts(&self) -> Nanos {
        let rtp = match self.packet.as_ref().and_then(|p| p.rtp()) {
            Some(rtp) => rtp,
            None => return 0,
        };
        if rtp.capture_ts <= 0 {
            return 0;
        }
        rtp.capture_ts + self.encoding.spec.samples_to_ns(self.packet_pos)
    }
}

impl FrameReader for Depacketizer {
    fn read(&mut self, frame: &mut Frame, n_samples: usize) -> Result<(), Status> {
        frame.reset(n_samples);
        let channels = self.channels();
        debug_assert!(n_samples % channels == 0);

        let mut pos = 0;
        while pos < n_samples {
            if self.packet.is_none() && self.pending_gap == 0 {
                match self.next_packet() {
                    Ok(true) => {}
                    Ok(false) => {
                        // no more data; the tail stays silent
                        let left = n_samples - pos;
                        if self.started {
                            self.plc_fill(frame, pos, n_samples);
                            self.stats.missing_samples += (left / channels) as u64;
                            frame.n_missing += left;
                            self.next_ts = self.next_ts.wrapping_add((left / channels) as u32);
                        } else {
                            frame.n_missing += left;
                        }
                        return Ok(());
                    }
                    Err(status) => return Err(status),
                }
            }

            if self.pending_gap > 0 {
                let gap_samples = (self.pending_gap as usize * channels).min(n_samples - pos);
                let end = pos + gap_samples;
                self.plc_fill(frame, pos, end);
                frame.n_missing += gap_samples;
                self.stats.missing_samples += (gap_samples / channels) as u64;
                self.pending_gap -= (gap_samples / channels) as u32;
                self.next_ts = self.next_ts.wrapping_add((gap_samples / channels) as u32);
                pos = end;
                continue;
            }

            let packet = self.packet.clone().expect("packet present");
            let rtp = packet.rtp().expect("rtp view").clone();

            if frame.capture_ts == 0 && pos == 0 {
                frame.capture_ts = self.playhead_capture_ts();
            }

            let frames_left = (rtp.duration - self.packet_pos) as usize;
            let want_frames = (n_samples - pos) / channels;
            let take = frames_left.min(want_frames);

            let byte_start = self.packet_pos as usize * self.encoding.frame_bytes();
            let byte_end = byte_start + take * self.encoding.frame_bytes();
            let payload = packet.payload();
            let byte_end = byte_end.min(payload.len());
            let decoded = self
                .encoding
                .decode(&payload[byte_start.min(payload.len())..byte_end], &mut frame.samples[pos..pos + take * channels]);

            self.stats.decoded_samples += (decoded / channels) as u64;
            let taken = frame.samples[pos..pos + take * channels].to_vec();
            self.push_history(&taken);

            self.packet_pos += take as u32;
            self.next_ts = self.next_ts.wrapping_add(take as u32);
            pos += take * channels;

            if self.packet_pos >= rtp.duration {
                self.packet = None;
                self.packet_pos = 0;
            }
        }
        Ok(())
    }
}

impl Depacketizer {
    fn plc_fill(&mut self, frame: &mut Frame, start: usize, end: usize) {
        // split borrow: concealment writes into the frame, reading history
        let history = std::mem::take(&mut self.history);
        self.plc.fill_gap(&mut frame.samples[start..end], &history);
        self.history = history;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{FifoQueue, PacketFactory, PacketWriter, RtpInfo, FLAG_AUDIO};
    use crate::rtp::EncodingMap;
    use std::sync::Arc;

    const DUR: u32 = 8; // samples per packet per channel

    fn encoding() -> Encoding {
        EncodingMap::new().find(10).unwrap()
    }

    // payload carrying a ramp starting at `base`
    fn packet(factory: &PacketFactory, seqnum: u16, stream_ts: u32, base: i16) -> PacketPtr {
        let enc = encoding();
        let mut p = factory.new_packet().unwrap();
        let samples: Vec<f32> = (0..DUR as i16 * 2)
            .map(|i| (base + i) as f32 / 32768.0)
            .collect();
        let mut payload = Vec::new();
        enc.encode(&samples, &mut payload);
        p.buffer_mut().extend_from_slice(&payload);
        let len = p.buffer().len();
        p.set_rtp(RtpInfo {
            payload_type: 10,
            source_id: 1,
            seqnum,
            stream_ts,
            capture_ts: 0,
            duration: DUR,
            payload: 0..len,
        });
        p.add_flags(FLAG_AUDIO);
        Arc::new(p)
    }

    fn depacketizer(packets: Vec<PacketPtr>) -> Depacketizer {
        let mut q = FifoQueue::new();
        for p in packets {
            q.write(p).unwrap();
        }
        Depacketizer::new(Box::new(q), encoding())
    }

    #[test]
    fn test_continuous_stream() {
        let factory = PacketFactory::new(256, 16);
        let packets = (0..4u16)
            .map(|sn| packet(&factory, sn, sn as u32 * DUR, (sn as i16) * 16))
            .collect();
        let mut d = depacketizer(packets);

        let mut frame = Frame::new();
        d.read(&mut frame, 4 * DUR as usize * 2).unwrap();
        assert_eq!(frame.n_missing, 0);
        // each packet carries a ramp of 16 values starting at sn*16
        for sn in 0..4usize {
            for i in 0..16 {
                let v = frame.samples[sn * 16 + i];
                let expected = (sn * 16 + i) as f32 / 32768.0;
                assert!((v - expected).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn test_gap_is_concealed() {
        let factory = PacketFactory::new(256, 16);
        // packet 1 missing: ts jumps from 8 to 24
        let packets = vec![
            packet(&factory, 0, 0, 0),
            packet(&factory, 2, 2 * DUR, 32),
        ];
        let mut d = depacketizer(packets);

        let mut frame = Frame::new();
        d.read(&mut frame, 3 * DUR as usize * 2).unwrap();
        assert_eq!(frame.n_missing, DUR as usize * 2);
        // the gap region is silent
        for i in 16..32 {
            assert_eq!(frame.samples[i], 0.0);
        }
        // the following packet landed after the gap
        assert!((frame.samples[32] - 32.0 / 32768.0).abs() < 1e-4);
        assert_eq!(d.stats().missing_samples, DUR as u64);
    }

    #[test]
    fn test_late_packet_dropped() {
        let factory = PacketFactory::new(256, 16);
        let packets = vec![
            packet(&factory, 2, 2 * DUR, 32),
            packet(&factory, 0, 0, 0), // entirely behind once playhead moved
        ];
        let mut d = depacketizer(packets);

        let mut frame = Frame::new();
        d.read(&mut frame, DUR as usize * 2).unwrap();
        // playhead starts at first packet's ts
        assert_eq!(frame.n_missing, 0);

        d.read(&mut frame, DUR as usize * 2).unwrap();
        assert_eq!(d.stats().late_packets, 1);
    }

    #[test]
    fn test_drain_fills_silence() {
        let factory = PacketFactory::new(256, 16);
        let packets = vec![packet(&factory, 0, 0, 0)];
        let mut d = depacketizer(packets);

        let mut frame = Frame::new();
        d.read(&mut frame, 2 * DUR as usize * 2).unwrap();
        assert_eq!(frame.n_missing, DUR as usize * 2);
        assert!(!frame.is_blank());
    }

    #[test]
    fn test_held_samples() {
        let factory = PacketFactory::new(256, 16);
        let packets = vec![packet(&factory, 0, 0, 0)];
        let mut d = depacketizer(packets);

        let mut frame = Frame::new();
        // consume half a packet
        d.read(&mut frame, DUR as usize).unwrap();
        assert_eq!(d.held_samples(), (DUR / 2) as u64);
    }
}
