//! Packetizer: splits the outgoing sample stream into RTP packets.
//!
//! Accumulates written samples and emits a packet every `packet_length`
//! worth of them, stamping seqnum, stream timestamp and capture timestamp.
//! The stream identity (ssrc, initial seqnum, initial timestamp) is
//! randomized at startup.

use std::sync::Arc;

use rand::Rng;

use crate::core::time::Nanos;
use crate::core::Status;
use crate::packet::{PacketFactory, PacketWriter, RtpInfo, FLAG_AUDIO, FLAG_PREPARED};
use crate::rtp::{Encoding, HEADER_SIZE};

/// Sample-stream to packet-stream converter.
pub struct Packetizer {
    writer: Box<dyn PacketWriter>,
    factory: PacketFactory,
    encoding: Encoding,

    /// Samples-per-channel per packet.
    samples_per_packet: u32,

    source_id: u32,
    seqnum: u16,
    stream_ts: u32,

    /// Pending interleaved samples, not yet a full packet.
    pending: Vec<f32>,
    /// Capture timestamp of the first pending sample; 0 if unknown.
    pending_capture_ts: Nanos,

    n_packets: u64,
}

impl Packetizer {
    pub fn new(
        writer: Box<dyn PacketWriter>,
        factory: PacketFactory,
        encoding: Encoding,
        packet_length_ns: Nanos,
    ) -> Result<Self, Status> {
        let samples_per_packet = encoding.spec.ns_to_samples(packet_length_ns);
        if samples_per_packet == 0 {
            return Err(Status::BadConfig);
        }
        let mut rng = rand::thread_rng();
        Ok(Self {
            writer,
            factory,
            encoding,
            samples_per_packet,
            source_id: rng.gen(),
            seqnum: rng.gen(),
            stream_ts: rng.gen(),
            pending: Vec::new(),
            pending_capture_ts: 0,
            n_packets: 0,
        })
    }

    pub fn source_id(&self) -> u32 {
        self.source_id
    }

    /// (stream timestamp, capture timestamp) of the next packet to be
    /// produced, for control feedback.
    pub fn mapping(&self) -> (u32, Nanos) {
        (self.stream_ts, self.pending_capture_ts)
    }

    pub fn n_packets(&self) -> u64 {
        self.n_packets
    }

    /// Append interleaved samples captured at `capture_ts` (of the first
    /// sample; 0 when the clock is unknown). Emits as many packets as fit.
    pub fn write(&mut self, samples: &[f32], capture_ts: Nanos) -> Result<(), Status> {
        let channels = self.encoding.spec.channels as usize;
        if self.pending.is_empty() {
            self.pending_capture_ts = capture_ts;
        }
        self.pending.extend_from_slice(samples);

        let packet_samples = self.samples_per_packet as usize * channels;
        while self.pending.len() >= packet_samples {
            let rest = self.pending.split_off(packet_samples);
            let chunk = std::mem::replace(&mut self.pending, rest);
            self.emit_packet(&chunk)?;
        }
        Ok(())
    }

    /// Emit the pending tail as a short packet, if any.
    pub fn flush(&mut self) -> Result<(), Status> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::take(&mut self.pending);
        self.emit_packet(&chunk)
    }

    fn emit_packet(&mut self, samples: &[f32]) -> Result<(), Status> {
        let channels = self.encoding.spec.channels as usize;
        let duration = (samples.len() / channels) as u32;

        let mut packet = self.factory.new_packet()?;
        let buf = packet.buffer_mut();
        buf.resize(HEADER_SIZE, 0);
        self.encoding.encode(samples, buf);
        let payload = HEADER_SIZE..buf.len();

        packet.set_rtp(RtpInfo {
            payload_type: self.encoding.payload_type,
            source_id: self.source_id,
            seqnum: self.seqnum,
            stream_ts: self.stream_ts,
            capture_ts: self.pending_capture_ts,
            duration,
            payload,
        });
        packet.add_flags(FLAG_AUDIO | FLAG_PREPARED);

        self.seqnum = self.seqnum.wrapping_add(1);
        self.stream_ts = self.stream_ts.wrapping_add(duration);
        if self.pending_capture_ts > 0 {
            self.pending_capture_ts += self.encoding.spec.samples_to_ns(duration);
        }
        self.n_packets += 1;

        self.writer.write(Arc::new(packet))
    }
}
