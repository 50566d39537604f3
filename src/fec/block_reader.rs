//! FEC block reader.
//!
//! Consumes two parallel streams — source packets with block metadata and
//! repair packets with redundancy — and returns in-order source packets.
//! When losses are detected, missing packets are reconstructed from the
//! remaining symbols of the block and inserted into the returned stream,
//! flagged as restored.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::Status;
use crate::packet::{
    FecInfo, PacketFactory, PacketPtr, PacketReader, PacketWriter, ReadMode, RtpInfo,
    SortedQueue, FLAG_AUDIO, FLAG_RESTORED,
};
use crate::rtp::Encoding;

use super::codec::BlockDecoder;
use super::{sbn_diff, sbn_next, FecScheme};

/// Block reader parameters.
#[derive(Debug, Clone, Copy)]
pub struct BlockReaderConfig {
    /// Maximum allowed source block number jump.
    pub max_sbn_jump: u32,
}

impl Default for BlockReaderConfig {
    fn default() -> Self {
        Self { max_sbn_jump: 100 }
    }
}

/// Per-stream counters, exposed to session metrics.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlockReaderStats {
    pub n_source_received: u64,
    pub n_repair_received: u64,
    pub n_restored: u64,
    pub n_emitted: u64,
    pub n_dropped_invalid: u64,
    pub n_dropped_late: u64,
}

/// FEC reader for block codes.
pub struct BlockReader {
    scheme: FecScheme,
    decoder: Box<dyn BlockDecoder>,
    source_reader: Box<dyn PacketReader>,
    repair_reader: Box<dyn PacketReader>,
    factory: PacketFactory,
    encoding: Encoding,

    source_queue: SortedQueue,
    repair_queue: SortedQueue,

    source_block: Vec<Option<PacketPtr>>,
    repair_block: Vec<Option<PacketPtr>>,

    started: bool,
    can_repair: bool,

    head_index: usize,
    cur_sbn: u32,

    payload_size: usize,
    source_block_resized: bool,
    repair_block_resized: bool,
    payload_resized: bool,

    // identity of the protected stream, learned from received packets and
    // used when synthesizing restored packets
    stream_id: Option<(u8, u32)>,
    // seqnum/timestamp the next emission at head_index would carry if the
    // stream were continuous; used when a whole block head was lost
    next_seqnum_hint: Option<(u16, u32)>,

    prev_block_ts_valid: bool,
    prev_block_ts: u32,
    block_max_duration: u32,

    max_sbn_jump: u32,
    stats: BlockReaderStats,
}

impl BlockReader {
    pub fn new(
        config: BlockReaderConfig,
        scheme: FecScheme,
        decoder: Box<dyn BlockDecoder>,
        source_reader: Box<dyn PacketReader>,
        repair_reader: Box<dyn PacketReader>,
        factory: PacketFactory,
        encoding: Encoding,
    ) -> Self {
        Self {
            scheme,
            decoder,
            source_reader,
            repair_reader,
            factory,
            encoding,
            source_queue: SortedQueue::new(),
            repair_queue: SortedQueue::new(),
            source_block: Vec::new(),
            repair_block: Vec::new(),
            started: false,
            can_repair: false,
            head_index: 0,
            cur_sbn: 0,
            payload_size: 0,
            source_block_resized: false,
            repair_block_resized: false,
            payload_resized: false,
            stream_id: None,
            next_seqnum_hint: None,
            prev_block_ts_valid: false,
            prev_block_ts: 0,
            block_max_duration: 0,
            max_sbn_jump: config.max_sbn_jump,
            stats: BlockReaderStats::default(),
        }
    }

    /// Did the reader catch a block beginning yet?
    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn stats(&self) -> BlockReaderStats {
        self.stats
    }

    /// Largest first-packet-to-first-packet block distance observed, in
    /// stream timestamp units. Zero until a full block boundary was seen.
    pub fn max_block_duration(&self) -> u32 {
        self.block_max_duration
    }

    // -- ingest --------------------------------------------------------

    fn fetch_all_packets(&mut self) -> Result<(), Status> {
        loop {
            match self.source_reader.read(ReadMode::Fetch) {
                Ok(packet) => self.ingest_source_packet(packet)?,
                Err(Status::Drain) | Err(Status::NoData) => break,
                Err(status) => return Err(status),
            }
        }
        loop {
            match self.repair_reader.read(ReadMode::Fetch) {
                Ok(packet) => self.ingest_repair_packet(packet)?,
                Err(Status::Drain) | Err(Status::NoData) => break,
                Err(status) => return Err(status),
            }
        }
        Ok(())
    }

    fn ingest_source_packet(&mut self, packet: PacketPtr) -> Result<(), Status> {
        let fec = match packet.fec() {
            Some(fec) => fec.clone(),
            None => {
                self.stats.n_dropped_invalid += 1;
                return Ok(());
            }
        };
        self.check_scheme(fec.scheme)?;
        self.check_block_size(&fec)?;

        if fec.sbl == 0 || fec.esi >= fec.sbl || packet.fec_payload().is_empty() {
            self.stats.n_dropped_invalid += 1;
            return Ok(());
        }

        self.stats.n_source_received += 1;
        self.source_queue.write(packet)
    }

    fn ingest_repair_packet(&mut self, packet: PacketPtr) -> Result<(), Status> {
        let fec = match packet.fec() {
            Some(fec) => fec.clone(),
            None => {
                self.stats.n_dropped_invalid += 1;
                return Ok(());
            }
        };
        self.check_scheme(fec.scheme)?;
        self.check_block_size(&fec)?;

        if fec.sbl == 0
            || fec.nes < fec.sbl
            || fec.esi < fec.sbl
            || fec.esi >= fec.nes
            || packet.fec_payload().is_empty()
        {
            self.stats.n_dropped_invalid += 1;
            return Ok(());
        }

        self.stats.n_repair_received += 1;
        self.repair_queue.write(packet)
    }

    fn check_scheme(&mut self, scheme: FecScheme) -> Result<(), Status> {
        if scheme == self.scheme {
            return Ok(());
        }
        if self.stats.n_source_received + self.stats.n_repair_received > 0 {
            warn!(
                got = %scheme,
                expected = %self.scheme,
                "fec block reader: scheme changed mid-stream"
            );
            return Err(Status::Abort);
        }
        self.stats.n_dropped_invalid += 1;
        Ok(())
    }

    fn check_block_size(&self, fec: &FecInfo) -> Result<(), Status> {
        let max = self.scheme.max_block_len();
        if fec.sbl > max || (fec.nes != 0 && fec.nes > max) {
            warn!(
                sbl = fec.sbl,
                nes = fec.nes,
                max, "fec block reader: oversized block"
            );
            return Err(Status::Abort);
        }
        Ok(())
    }

    // -- block filling -------------------------------------------------

    fn try_start(&mut self) {
        if self.started {
            return;
        }
        if let Some(head) = self.source_queue.head() {
            if let Some(fec) = head.fec() {
                self.cur_sbn = fec.sbn;
                self.started = true;
                debug!(sbn = self.cur_sbn, "fec block reader: got block beginning");
            }
        }
    }

    fn fill_block(&mut self) -> Result<(), Status> {
        self.fill_source_block()?;
        self.fill_repair_block()?;
        Ok(())
    }

    fn fill_source_block(&mut self) -> Result<(), Status> {
        loop {
            let sbn = match self.source_queue.head().and_then(|p| p.fec()) {
                Some(fec) => fec.sbn,
                None => break,
            };
            let d = sbn_diff(self.scheme, sbn, self.cur_sbn);
            if d.unsigned_abs() > self.max_sbn_jump as u64 {
                warn!(
                    sbn,
                    cur_sbn = self.cur_sbn,
                    jump = d,
                    "fec block reader: too long source block number jump"
                );
                return Err(Status::Abort);
            }
            if d > 0 {
                break;
            }
            let packet = self.source_queue.read(ReadMode::Fetch).expect("head exists");
            if d < 0 {
                self.stats.n_dropped_late += 1;
                continue;
            }
            self.process_source_packet(packet);
        }
        Ok(())
    }

    fn fill_repair_block(&mut self) -> Result<(), Status> {
        loop {
            let sbn = match self.repair_queue.head().and_then(|p| p.fec()) {
                Some(fec) => fec.sbn,
                None => break,
            };
            let d = sbn_diff(self.scheme, sbn, self.cur_sbn);
            if d > 0 {
                if d.unsigned_abs() > self.max_sbn_jump as u64 {
                    // stale or corrupt repair stream; keep it from growing
                    let _ = self.repair_queue.read(ReadMode::Fetch);
                    self.stats.n_dropped_invalid += 1;
                    continue;
                }
                break;
            }
            let packet = self.repair_queue.read(ReadMode::Fetch).expect("head exists");
            if d < 0 {
                self.stats.n_dropped_late += 1;
                continue;
            }
            self.process_repair_packet(packet);
        }
        Ok(())
    }

    fn process_source_packet(&mut self, packet: PacketPtr) {
        let fec = packet.fec().expect("validated").clone();

        if !self.update_source_block_size(fec.sbl as usize) {
            return;
        }
        if !self.update_payload_size(packet.fec_payload().len()) {
            return;
        }
        if fec.nes != 0 && !self.update_repair_block_size(fec.sbl as usize, fec.nes as usize) {
            return;
        }

        if let Some(rtp) = packet.rtp() {
            if self.stream_id.is_none() {
                self.stream_id = Some((rtp.payload_type, rtp.source_id));
            }
        }

        let esi = fec.esi as usize;
        if esi < self.head_index {
            self.stats.n_dropped_late += 1;
            return;
        }
        if esi >= self.source_block.len() || self.source_block[esi].is_some() {
            return;
        }
        self.source_block[esi] = Some(packet);
        self.can_repair = true;
    }

    fn process_repair_packet(&mut self, packet: PacketPtr) {
        let fec = packet.fec().expect("validated").clone();

        if !self.update_source_block_size(fec.sbl as usize) {
            return;
        }
        if !self.update_repair_block_size(fec.sbl as usize, fec.nes as usize) {
            return;
        }
        if !self.update_payload_size(packet.fec_payload().len()) {
            return;
        }

        let idx = (fec.esi - fec.sbl) as usize;
        if idx >= self.repair_block.len() || self.repair_block[idx].is_some() {
            return;
        }
        self.repair_block[idx] = Some(packet);
        self.can_repair = true;
    }

    // Block geometry may only change at a block boundary; within a block,
    // packets that disagree are dropped.
    fn update_source_block_size(&mut self, sbl: usize) -> bool {
        if self.source_block_resized {
            if sbl != self.source_block.len() {
                self.stats.n_dropped_invalid += 1;
                return false;
            }
            return true;
        }
        if sbl != self.source_block.len() {
            self.source_block.clear();
            self.source_block.resize(sbl, None);
            self.reset_block_duration();
        } else {
            self.source_block.iter_mut().for_each(|s| *s = None);
        }
        self.source_block_resized = true;
        true
    }

    fn update_repair_block_size(&mut self, sbl: usize, nes: usize) -> bool {
        let rblen = nes - sbl;
        if self.repair_block_resized {
            if rblen != self.repair_block.len() {
                self.stats.n_dropped_invalid += 1;
                return false;
            }
            return true;
        }
        if rblen != self.repair_block.len() {
            self.repair_block.clear();
            self.repair_block.resize(rblen, None);
            self.reset_block_duration();
        } else {
            self.repair_block.iter_mut().for_each(|s| *s = None);
        }
        self.repair_block_resized = true;
        true
    }

    fn update_payload_size(&mut self, size: usize) -> bool {
        if self.payload_resized {
            if size != self.payload_size {
                self.stats.n_dropped_invalid += 1;
                return false;
            }
            return true;
        }
        if size != self.payload_size {
            self.reset_block_duration();
        }
        self.payload_size = size;
        self.payload_resized = true;
        true
    }

    fn reset_block_duration(&mut self) {
        self.prev_block_ts_valid = false;
        self.block_max_duration = 0;
    }

    // -- repair --------------------------------------------------------

    fn try_repair(&mut self) -> Result<(), Status> {
        if !self.can_repair {
            return Ok(());
        }
        if !self.source_block_resized || !self.repair_block_resized || !self.payload_resized {
            return Ok(());
        }

        let sblen = self.source_block.len();
        let rblen = self.repair_block.len();
        let n_present = self.source_block.iter().flatten().count()
            + self.repair_block.iter().flatten().count();
        if n_present < sblen {
            return Ok(());
        }

        self.decoder
            .begin_block(sblen, rblen, self.payload_size)
            .map_err(|status| {
                warn!(%status, "fec block reader: can't begin decoder block");
                status
            })?;

        for (i, slot) in self.source_block.iter().enumerate() {
            if let Some(p) = slot {
                if !p.has_flags(FLAG_RESTORED) {
                    self.decoder.set_buffer(i, p.fec_payload());
                }
            }
        }
        for (i, slot) in self.repair_block.iter().enumerate() {
            if let Some(p) = slot {
                self.decoder.set_buffer(sblen + i, p.fec_payload());
            }
        }

        for esi in self.head_index..sblen {
            if self.source_block[esi].is_some() {
                continue;
            }
            let symbol = match self.decoder.repair(esi) {
                Some(symbol) => symbol.to_vec(),
                None => continue,
            };
            match self.make_restored_packet(esi, &symbol) {
                Some(packet) => {
                    self.source_block[esi] = Some(packet);
                    self.stats.n_restored += 1;
                }
                None => {
                    debug!(esi, "fec block reader: can't synthesize restored packet");
                }
            }
        }

        self.decoder.end_block();
        self.can_repair = false;
        Ok(())
    }

    // Build a packet for a repaired symbol. Header fields are synthesized
    // from a received packet of the same block, falling back to stream
    // continuity when the whole block head was lost.
    fn make_restored_packet(&mut self, esi: usize, symbol: &[u8]) -> Option<PacketPtr> {
        let duration = self.encoding.payload_to_samples(symbol.len());

        let reference = self
            .source_block
            .iter()
            .flatten()
            .find(|p| !p.has_flags(FLAG_RESTORED) && p.rtp().is_some());

        let (payload_type, source_id, seqnum, stream_ts, capture_ts) = match reference {
            Some(p) => {
                let rtp = p.rtp().expect("reference has rtp");
                let fec = p.fec().expect("reference has fec");
                let delta = esi as i64 - fec.esi as i64;
                let seqnum = rtp.seqnum.wrapping_add(delta as u16);
                let stream_ts = rtp
                    .stream_ts
                    .wrapping_add((delta * duration as i64) as u32);
                let capture_ts = if rtp.capture_ts > 0 {
                    rtp.capture_ts + self.encoding.spec.ts_delta_to_ns(delta * duration as i64)
                } else {
                    0
                };
                (rtp.payload_type, rtp.source_id, seqnum, stream_ts, capture_ts)
            }
            None => {
                let (payload_type, source_id) = self.stream_id?;
                let (hint_sn, hint_ts) = self.next_seqnum_hint?;
                let delta = esi as i64 - self.head_index as i64;
                (
                    payload_type,
                    source_id,
                    hint_sn.wrapping_add(delta as u16),
                    hint_ts.wrapping_add((delta * duration as i64) as u32),
                    0,
                )
            }
        };

        let mut packet = self.factory.new_packet().ok()?;
        packet.buffer_mut().extend_from_slice(symbol);
        packet.set_rtp(RtpInfo {
            payload_type,
            source_id,
            seqnum,
            stream_ts,
            capture_ts,
            duration,
            payload: 0..symbol.len(),
        });
        packet.add_flags(FLAG_AUDIO | FLAG_RESTORED);
        Some(Arc::new(packet))
    }

    // -- emission ------------------------------------------------------

    fn next_block(&mut self) {
        if let Some(first) = self.source_block.first().and_then(|s| s.as_ref()) {
            if let Some(rtp) = first.rtp() {
                self.update_block_duration(rtp.stream_ts);
            }
        }

        self.cur_sbn = sbn_next(self.scheme, self.cur_sbn);
        self.head_index = 0;
        self.source_block.iter_mut().for_each(|s| *s = None);
        self.repair_block.iter_mut().for_each(|s| *s = None);
        self.source_block_resized = false;
        self.repair_block_resized = false;
        self.payload_resized = false;
        self.can_repair = false;
        self.decoder.end_block();
    }

    fn update_block_duration(&mut self, block_ts: u32) {
        if self.prev_block_ts_valid {
            let d = crate::packet::stream_ts_diff(block_ts, self.prev_block_ts);
            if d <= 0 {
                self.prev_block_ts_valid = false;
                self.prev_block_ts = block_ts;
                return;
            }
            self.block_max_duration = self.block_max_duration.max(d as u32);
        }
        self.prev_block_ts = block_ts;
        self.prev_block_ts_valid = true;
    }

    fn emit(&mut self, packet: PacketPtr) -> PacketPtr {
        if let Some(rtp) = packet.rtp() {
            self.next_seqnum_hint = Some((
                rtp.seqnum.wrapping_add(1),
                rtp.stream_ts.wrapping_add(rtp.duration),
            ));
        }
        self.head_index += 1;
        self.stats.n_emitted += 1;
        packet
    }

    // Pick the next packet of the current block, repairing on demand.
    // `Ok(None)` means the caller should advance to the next block (fetch
    // abandoned an end-of-block loss region).
    fn get_next_packet(&mut self, mode: ReadMode) -> Result<Option<PacketPtr>, Status> {
        if self.source_block[self.head_index].is_none() {
            self.try_repair()?;
        }

        let mut pos = self.head_index;
        while pos < self.source_block.len() && self.source_block[pos].is_none() {
            pos += 1;
        }

        if pos == self.source_block.len() {
            // nothing left in this block; lost packets at the tail might
            // still repair once more packets arrive
            if self.source_queue.is_empty() {
                return Err(Status::Drain);
            }
            match mode {
                // the conservative choice: peek does not give up on the
                // loss region while fetch moves on
                ReadMode::Peek => Err(Status::Drain),
                ReadMode::Fetch => {
                    self.head_index = self.source_block.len();
                    Ok(None)
                }
            }
        } else {
            match mode {
                ReadMode::Peek => Ok(Some(self.source_block[pos].clone().expect("present"))),
                ReadMode::Fetch => {
                    if pos > self.head_index {
                        // the region before `pos` can no longer repair
                        // without stalling the stream; skip it
                        self.head_index = pos;
                    }
                    let packet = self.source_block[pos].clone().expect("present");
                    Ok(Some(self.emit(packet)))
                }
            }
        }
    }
}

impl PacketReader for BlockReader {
    fn read(&mut self, mode: ReadMode) -> Result<PacketPtr, Status> {
        self.fetch_all_packets()?;
        self.try_start();
        if !self.started {
            return Err(Status::Drain);
        }

        loop {
            self.fill_block()?;

            if self.head_index == self.source_block.len() && !self.source_block.is_empty() {
                self.next_block();
                continue;
            }
            if self.source_block.is_empty() {
                // block geometry not learned yet
                return Err(Status::Drain);
            }

            match self.get_next_packet(mode)? {
                Some(packet) => return Ok(packet),
                None => {
                    self.next_block();
                    continue;
                }
            }
        }
    }
}
