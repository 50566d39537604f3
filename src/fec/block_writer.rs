//! FEC block writer.
//!
//! Accepts an ordered stream of source packets and emits an interleaved
//! stream: each block of N source packets (footer attached) is followed by
//! M repair packets generated by the codec. Block sizes can be changed at
//! run time; the change takes effect at the next block boundary.

use std::sync::Arc;

use tracing::debug;

use crate::core::Status;
use crate::packet::{
    stream_ts_diff, FecInfo, PacketFactory, PacketPtr, PacketWriter, FLAG_COMPOSED, FLAG_REPAIR,
};

use super::codec::BlockEncoder;
use super::{sbn_next, wire, FecScheme};

/// Block writer parameters.
#[derive(Debug, Clone, Copy)]
pub struct BlockWriterConfig {
    /// Number of source packets per block.
    pub n_source_packets: usize,
    /// Number of repair packets per block.
    pub n_repair_packets: usize,
}

impl Default for BlockWriterConfig {
    fn default() -> Self {
        Self {
            n_source_packets: 18,
            n_repair_packets: 10,
        }
    }
}

/// FEC writer for block codes.
pub struct BlockWriter {
    scheme: FecScheme,
    encoder: Box<dyn BlockEncoder>,
    writer: Box<dyn PacketWriter>,
    factory: PacketFactory,

    cur_sblen: usize,
    next_sblen: usize,
    cur_rblen: usize,
    next_rblen: usize,
    cur_payload_size: usize,

    cur_sbn: u32,
    cur_packet: usize,

    prev_block_ts_valid: bool,
    prev_block_ts: u32,
    block_max_duration: u32,
}

impl BlockWriter {
    pub fn new(
        config: BlockWriterConfig,
        scheme: FecScheme,
        encoder: Box<dyn BlockEncoder>,
        writer: Box<dyn PacketWriter>,
        factory: PacketFactory,
    ) -> Result<Self, Status> {
        if config.n_source_packets == 0 || config.n_repair_packets == 0 {
            return Err(Status::BadConfig);
        }
        if (config.n_source_packets + config.n_repair_packets) as u32 > scheme.max_block_len() {
            return Err(Status::BadConfig);
        }
        Ok(Self {
            scheme,
            encoder,
            writer,
            factory,
            cur_sblen: config.n_source_packets,
            next_sblen: config.n_source_packets,
            cur_rblen: config.n_repair_packets,
            next_rblen: config.n_repair_packets,
            cur_payload_size: 0,
            cur_sbn: rand::random::<u16>() as u32,
            cur_packet: 0,
            prev_block_ts_valid: false,
            prev_block_ts: 0,
            block_max_duration: 0,
        })
    }

    /// Change block sizes; takes effect at the next block boundary.
    pub fn resize(&mut self, sblen: usize, rblen: usize) -> Result<(), Status> {
        if sblen == 0 || rblen == 0 {
            return Err(Status::BadConfig);
        }
        if (sblen + rblen) as u32 > self.scheme.max_block_len() {
            return Err(Status::BadConfig);
        }
        if sblen != self.next_sblen || rblen != self.next_rblen {
            debug!(sblen, rblen, "fec block writer: scheduling block resize");
        }
        self.next_sblen = sblen;
        self.next_rblen = rblen;
        // the duration maximum is tracked since the last resize
        self.block_max_duration = 0;
        Ok(())
    }

    /// Largest first-packet-to-first-packet block distance seen since the
    /// last resize, in stream timestamp units.
    pub fn max_block_duration(&self) -> u32 {
        self.block_max_duration
    }

    fn begin_block(&mut self, packet: &PacketPtr) -> Result<(), Status> {
        let rtp = packet.rtp().ok_or(Status::Abort)?;
        self.update_block_duration(rtp.stream_ts);

        if self.cur_sblen != self.next_sblen || self.cur_rblen != self.next_rblen {
            self.cur_sblen = self.next_sblen;
            self.cur_rblen = self.next_rblen;
            self.prev_block_ts_valid = false;
        }
        self.cur_payload_size = rtp.payload.len();
        debug_assert!(self.cur_payload_size > 0, "fec block writer: empty payload");

        self.encoder
            .begin_block(self.cur_sblen, self.cur_rblen, self.cur_payload_size)
    }

    fn end_block(&mut self) -> Result<(), Status> {
        self.encoder.fill_buffers()?;

        // stage all repair packets before emitting any, so an allocation
        // failure leaves nothing half-written
        let mut repair_block = Vec::with_capacity(self.cur_rblen);
        for i in 0..self.cur_rblen {
            repair_block.push(self.make_repair_packet(i)?);
        }
        for packet in repair_block {
            self.writer.write(packet)?;
        }

        self.encoder.end_block();
        Ok(())
    }

    fn make_repair_packet(&mut self, i: usize) -> Result<PacketPtr, Status> {
        let hlen = wire::repair_header_len(self.scheme);
        let symbol = self.encoder.repair_buffer(i);

        let mut packet = self.factory.new_packet()?;
        let fields = wire::BlockFields {
            sbn: self.cur_sbn,
            esi: (self.cur_sblen + i) as u32,
            sbl: self.cur_sblen as u32,
            nes: (self.cur_sblen + self.cur_rblen) as u32,
        };
        let buf = packet.buffer_mut();
        buf.resize(hlen + symbol.len(), 0);
        wire::compose_repair_header(self.scheme, &fields, &mut buf[..hlen]);
        buf[hlen..].copy_from_slice(symbol);

        packet.set_fec(FecInfo {
            scheme: self.scheme,
            sbn: fields.sbn,
            esi: fields.esi,
            sbl: fields.sbl,
            nes: fields.nes,
            payload: hlen..hlen + self.cur_payload_size,
        });
        packet.add_flags(FLAG_REPAIR | FLAG_COMPOSED);
        Ok(Arc::new(packet))
    }

    // Stamp block fields on a source packet and append the wire footer.
    fn fill_source_packet(&mut self, packet: &mut PacketPtr) {
        let p = Arc::make_mut(packet);
        let payload = p.rtp().map(|r| r.payload.clone()).unwrap_or(0..0);

        let fields = wire::BlockFields {
            sbn: self.cur_sbn,
            esi: self.cur_packet as u32,
            sbl: self.cur_sblen as u32,
            nes: (self.cur_sblen + self.cur_rblen) as u32,
        };
        let flen = wire::source_footer_len(self.scheme);
        let buf = p.buffer_mut();
        let end = buf.len();
        buf.resize(end + flen, 0);
        wire::compose_source_footer(self.scheme, &fields, &mut buf[end..]);

        p.set_fec(FecInfo {
            scheme: self.scheme,
            sbn: fields.sbn,
            esi: fields.esi,
            sbl: fields.sbl,
            nes: fields.nes,
            payload,
        });
    }

    fn update_block_duration(&mut self, block_ts: u32) {
        if self.prev_block_ts_valid {
            let d = stream_ts_diff(block_ts, self.prev_block_ts);
            if d <= 0 {
                self.prev_block_ts_valid = false;
            } else {
                self.block_max_duration = self.block_max_duration.max(d as u32);
            }
        }
        self.prev_block_ts = block_ts;
        self.prev_block_ts_valid = true;
    }
}

impl PacketWriter for BlockWriter {
    fn write(&mut self, mut packet: PacketPtr) -> Result<(), Status> {
        if self.cur_packet == 0 {
            if let Err(status) = self.begin_block(&packet) {
                // no partial state survives a failure; the next write
                // starts a fresh block
                self.cur_packet = 0;
                self.cur_sbn = sbn_next(self.scheme, self.cur_sbn);
                return Err(status);
            }
        }

        self.fill_source_packet(&mut packet);
        self.encoder.set_buffer(self.cur_packet, packet.payload());
        self.writer.write(packet)?;

        self.cur_packet += 1;
        if self.cur_packet == self.cur_sblen {
            let result = self.end_block();
            self.cur_packet = 0;
            self.cur_sbn = sbn_next(self.scheme, self.cur_sbn);
            result?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fec::codec::Rs8mEncoder;
    use crate::packet::{FifoQueue, PacketReader, ReadMode, RtpInfo};
    use crate::rtp::HEADER_SIZE;
    use parking_lot::Mutex;

    // shared queue so the test can inspect what the writer emitted
    #[derive(Clone)]
    struct SharedQueue(std::sync::Arc<Mutex<FifoQueue>>);

    impl SharedQueue {
        fn new() -> Self {
            Self(std::sync::Arc::new(Mutex::new(FifoQueue::new())))
        }

        fn drain(&self) -> Vec<PacketPtr> {
            let mut out = Vec::new();
            while let Ok(p) = self.0.lock().read(ReadMode::Fetch) {
                out.push(p);
            }
            out
        }
    }

    impl PacketWriter for SharedQueue {
        fn write(&mut self, packet: PacketPtr) -> Result<(), Status> {
            self.0.lock().write(packet)
        }
    }

    fn source_packet(factory: &PacketFactory, seqnum: u16, stream_ts: u32, psize: usize) -> PacketPtr {
        let mut p = factory.new_packet().unwrap();
        p.buffer_mut().resize(HEADER_SIZE + psize, 0);
        for (i, b) in p.buffer_mut()[HEADER_SIZE..].iter_mut().enumerate() {
            *b = (seqnum as usize + i) as u8;
        }
        p.set_rtp(RtpInfo {
            payload_type: 10,
            source_id: 7,
            seqnum,
            stream_ts,
            capture_ts: 0,
            duration: 44,
            payload: HEADER_SIZE..HEADER_SIZE + psize,
        });
        p.add_flags(crate::packet::FLAG_AUDIO);
        Arc::new(p)
    }

    fn make_writer(queue: SharedQueue, n: usize, m: usize) -> BlockWriter {
        BlockWriter::new(
            BlockWriterConfig {
                n_source_packets: n,
                n_repair_packets: m,
            },
            FecScheme::Rs8m,
            Box::new(Rs8mEncoder::new()),
            Box::new(queue),
            PacketFactory::new(512, 256),
        )
        .unwrap()
    }

    #[test]
    fn test_emits_source_then_repair() {
        const N: usize = 4;
        const M: usize = 2;
        let queue = SharedQueue::new();
        let factory = PacketFactory::new(512, 256);
        let mut writer = make_writer(queue.clone(), N, M);

        for sn in 0..N as u16 {
            writer
                .write(source_packet(&factory, sn, sn as u32 * 44, 64))
                .unwrap();
        }

        let out = queue.drain();
        assert_eq!(out.len(), N + M);

        for (i, p) in out.iter().take(N).enumerate() {
            let fec = p.fec().unwrap();
            assert_eq!(fec.esi, i as u32);
            assert_eq!(fec.sbl, N as u32);
            assert_eq!(fec.nes, (N + M) as u32);
            assert!(!p.has_flags(FLAG_REPAIR));
            // footer present after payload
            assert_eq!(p.buffer().len(), HEADER_SIZE + 64 + 6);
        }
        for (i, p) in out.iter().skip(N).enumerate() {
            let fec = p.fec().unwrap();
            assert_eq!(fec.esi, (N + i) as u32);
            assert!(p.has_flags(FLAG_REPAIR));
        }

        // all packets of one block share the sbn
        let sbn = out[0].fec().unwrap().sbn;
        assert!(out.iter().all(|p| p.fec().unwrap().sbn == sbn));
    }

    #[test]
    fn test_sbn_advances_per_block() {
        const N: usize = 3;
        let queue = SharedQueue::new();
        let factory = PacketFactory::new(512, 256);
        let mut writer = make_writer(queue.clone(), N, 2);

        for sn in 0..(3 * N) as u16 {
            writer
                .write(source_packet(&factory, sn, sn as u32 * 44, 32))
                .unwrap();
        }

        let out = queue.drain();
        let sbns: Vec<u32> = out.iter().map(|p| p.fec().unwrap().sbn).collect();
        let first = sbns[0];
        assert!(sbns[..5].iter().all(|&s| s == first));
        assert!(sbns[5..10].iter().all(|&s| s == sbn_next(FecScheme::Rs8m, first)));
    }

    #[test]
    fn test_resize_applies_at_boundary() {
        const N: usize = 4;
        let queue = SharedQueue::new();
        let factory = PacketFactory::new(512, 256);
        let mut writer = make_writer(queue.clone(), N, 2);

        writer.write(source_packet(&factory, 0, 0, 32)).unwrap();
        writer.resize(2, 1).unwrap();
        // current block still uses N=4
        for sn in 1..N as u16 {
            writer
                .write(source_packet(&factory, sn, sn as u32 * 44, 32))
                .unwrap();
        }
        // next block uses N=2, M=1
        for sn in N as u16..N as u16 + 2 {
            writer
                .write(source_packet(&factory, sn, sn as u32 * 44, 32))
                .unwrap();
        }

        let out = queue.drain();
        assert_eq!(out.len(), (N + 2) + (2 + 1));
        assert_eq!(out[N + 2].fec().unwrap().sbl, 2);
    }

    #[test]
    fn test_rejects_oversized_resize() {
        let queue = SharedQueue::new();
        let mut writer = make_writer(queue, 4, 2);
        assert_eq!(writer.resize(200, 100).err(), Some(Status::BadConfig));
        assert_eq!(writer.resize(0, 5).err(), Some(Status::BadConfig));
    }

    #[test]
    fn test_max_block_duration() {
        const N: usize = 2;
        let queue = SharedQueue::new();
        let factory = PacketFactory::new(512, 256);
        let mut writer = make_writer(queue.clone(), N, 1);

        // block firsts at ts 0, 400, 1000 -> durations 400 and 600
        let ts = [0u32, 100, 400, 700, 1000, 1100];
        for (sn, &t) in ts.iter().enumerate() {
            writer
                .write(source_packet(&factory, sn as u16, t, 32))
                .unwrap();
        }
        assert_eq!(writer.max_block_duration(), 600);
        queue.drain();
    }
}
