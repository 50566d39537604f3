//! Packet container and queue contracts.
//!
//! A packet is created by the factory, filled by a parser or composer, and
//! then shared between stages as `PacketPtr`. Stages that fill fields in
//! place (filter, injector) do so while they are still the sole owner.

pub mod concurrent_queue;
pub mod factory;
pub mod fifo_queue;
pub mod sorted_queue;

pub use concurrent_queue::{ConcurrentQueue, ConcurrentQueueWriter};
pub use factory::PacketFactory;
pub use fifo_queue::FifoQueue;
pub use sorted_queue::{SortKey, SortedQueue};

use std::net::SocketAddr;
use std::ops::Range;
use std::sync::Arc;

use crate::core::{PooledBuf, Status};
use crate::fec::FecScheme;

/// Shared reference-counted packet.
pub type PacketPtr = Arc<Packet>;

/// Packet carries an RTP header.
pub const FLAG_RTP: u32 = 1 << 0;
/// Packet carries audio payload.
pub const FLAG_AUDIO: u32 = 1 << 1;
/// Packet carries FEC repair symbols.
pub const FLAG_REPAIR: u32 = 1 << 2;
/// Packet was reconstructed by the FEC reader rather than received.
pub const FLAG_RESTORED: u32 = 1 << 3;
/// Packet fields are filled and ready for composing.
pub const FLAG_PREPARED: u32 = 1 << 4;
/// Packet buffer holds the composed wire image.
pub const FLAG_COMPOSED: u32 = 1 << 5;
/// Packet has UDP addressing attached.
pub const FLAG_UDP: u32 = 1 << 6;

/// RTP view of a packet.
#[derive(Debug, Clone, Default)]
pub struct RtpInfo {
    pub payload_type: u8,
    pub source_id: u32,
    pub seqnum: u16,
    pub stream_ts: u32,
    /// Wall-clock nanoseconds at the sender's capture device; 0 if unknown.
    pub capture_ts: i64,
    /// Packet duration in samples; 0 until filled by the filter.
    pub duration: u32,
    /// Payload byte range inside the packet buffer.
    pub payload: Range<usize>,
}

/// FEC view of a packet.
#[derive(Debug, Clone)]
pub struct FecInfo {
    pub scheme: FecScheme,
    /// Source block number.
    pub sbn: u32,
    /// Encoding symbol id within the block.
    pub esi: u32,
    /// Source block length (number of source symbols).
    pub sbl: u32,
    /// Number of encoding symbols (source + repair); 0 when the wire format
    /// does not carry it for this packet kind.
    pub nes: u32,
    /// Symbol byte range inside the packet buffer.
    pub payload: Range<usize>,
}

/// UDP addressing of a packet.
#[derive(Debug, Clone, Copy)]
pub struct UdpInfo {
    pub src_addr: SocketAddr,
    pub dst_addr: SocketAddr,
}

/// Packet: flags, optional protocol views, owned byte buffer.
#[derive(Clone)]
pub struct Packet {
    flags: u32,
    rtp: Option<RtpInfo>,
    fec: Option<FecInfo>,
    udp: Option<UdpInfo>,
    buffer: PooledBuf,
}

impl Packet {
    pub(crate) fn new(buffer: PooledBuf) -> Self {
        Self {
            flags: 0,
            rtp: None,
            fec: None,
            udp: None,
            buffer,
        }
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn has_flags(&self, flags: u32) -> bool {
        self.flags & flags == flags
    }

    pub fn add_flags(&mut self, flags: u32) {
        if flags & FLAG_AUDIO != 0 {
            debug_assert!(
                flags & FLAG_RTP != 0 || self.flags & FLAG_RTP != 0,
                "packet: audio flag requires rtp flag"
            );
        }
        self.flags |= flags;
    }

    pub fn rtp(&self) -> Option<&RtpInfo> {
        self.rtp.as_ref()
    }

    pub fn rtp_mut(&mut self) -> Option<&mut RtpInfo> {
        self.rtp.as_mut()
    }

    pub fn set_rtp(&mut self, rtp: RtpInfo) {
        self.rtp = Some(rtp);
        self.flags |= FLAG_RTP;
    }

    pub fn fec(&self) -> Option<&FecInfo> {
        self.fec.as_ref()
    }

    pub fn fec_mut(&mut self) -> Option<&mut FecInfo> {
        self.fec.as_mut()
    }

    pub fn set_fec(&mut self, fec: FecInfo) {
        debug_assert!(
            !self.has_flags(FLAG_RESTORED),
            "packet: restored packets carry no fec view"
        );
        self.fec = Some(fec);
    }

    pub fn udp(&self) -> Option<&UdpInfo> {
        self.udp.as_ref()
    }

    pub fn set_udp(&mut self, udp: UdpInfo) {
        self.udp = Some(udp);
        self.flags |= FLAG_UDP;
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }

    /// Audio payload bytes (RTP view).
    pub fn payload(&self) -> &[u8] {
        match &self.rtp {
            Some(rtp) => &self.buffer[rtp.payload.clone()],
            None => &[],
        }
    }

    /// FEC symbol bytes (FEC view).
    pub fn fec_payload(&self) -> &[u8] {
        match &self.fec {
            Some(fec) => &self.buffer[fec.payload.clone()],
            None => &[],
        }
    }

    /// Position of the packet in its stream, used for ordering.
    /// Source packets order by seqnum, repair packets by (sbn, esi).
    pub fn sort_key(&self) -> SortKey {
        if let Some(rtp) = &self.rtp {
            SortKey::Stream(rtp.seqnum)
        } else if let Some(fec) = &self.fec {
            SortKey::Block(fec.sbn, fec.esi)
        } else {
            SortKey::None
        }
    }
}

/// Read mode of `PacketReader::read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Return the next packet without consuming it.
    Peek,
    /// Remove and return the next packet.
    Fetch,
}

/// Uniform pull contract for packet stages.
///
/// `Err(Status::Drain)` means no data right now; every other error is
/// propagated unchanged up the chain.
pub trait PacketReader: Send {
    fn read(&mut self, mode: ReadMode) -> Result<PacketPtr, Status>;
}

/// Uniform push contract for packet stages.
pub trait PacketWriter: Send {
    fn write(&mut self, packet: PacketPtr) -> Result<(), Status>;
}

/// Smallest signed difference between seqnums (wraparound-aware).
pub fn seqnum_diff(a: u16, b: u16) -> i32 {
    a.wrapping_sub(b) as i16 as i32
}

/// Smallest signed difference between stream timestamps (wraparound-aware).
pub fn stream_ts_diff(a: u32, b: u32) -> i64 {
    a.wrapping_sub(b) as i32 as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seqnum_diff_wraps() {
        assert_eq!(seqnum_diff(10, 5), 5);
        assert_eq!(seqnum_diff(5, 10), -5);
        assert_eq!(seqnum_diff(2, 65534), 4);
        assert_eq!(seqnum_diff(65534, 2), -4);
    }

    #[test]
    fn test_stream_ts_diff_wraps() {
        assert_eq!(stream_ts_diff(1000, 500), 500);
        assert_eq!(stream_ts_diff(100, u32::MAX - 99), 200);
        assert_eq!(stream_ts_diff(u32::MAX - 99, 100), -200);
    }
}
