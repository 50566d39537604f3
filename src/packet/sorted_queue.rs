//! Packet queue sorted by stream position.
//!
//! Source packets order by seqnum, repair packets by (sbn, esi), both with
//! wraparound-aware comparison against the newest element. Duplicates are
//! dropped. Used by the FEC block reader to absorb network reordering.

use std::collections::VecDeque;

use crate::core::Status;

use super::{seqnum_diff, PacketPtr, PacketReader, PacketWriter, ReadMode};

/// Ordering key of a packet within its stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    /// RTP stream position (seqnum).
    Stream(u16),
    /// FEC block position (sbn, esi).
    Block(u32, u32),
    /// Packet carries no ordering information.
    None,
}

impl SortKey {
    /// Signed distance from `other` to `self`; `None` if not comparable.
    fn diff(&self, other: &SortKey) -> Option<i64> {
        match (self, other) {
            (SortKey::Stream(a), SortKey::Stream(b)) => Some(seqnum_diff(*a, *b) as i64),
            (SortKey::Block(asbn, aesi), SortKey::Block(bsbn, besi)) => {
                let sbn_d = asbn.wrapping_sub(*bsbn) as i32 as i64;
                if sbn_d != 0 {
                    Some(sbn_d << 32)
                } else {
                    Some(*aesi as i64 - *besi as i64)
                }
            }
            _ => None,
        }
    }
}

/// Queue of packets kept in ascending stream order.
#[derive(Default)]
pub struct SortedQueue {
    list: VecDeque<PacketPtr>,
    n_dropped_dups: u64,
}

impl SortedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn head(&self) -> Option<&PacketPtr> {
        self.list.front()
    }

    pub fn tail(&self) -> Option<&PacketPtr> {
        self.list.back()
    }

    /// Duplicates dropped so far.
    pub fn n_dropped_dups(&self) -> u64 {
        self.n_dropped_dups
    }

    // Position to insert `key` keeping ascending order, scanning from the
    // back since packets mostly arrive nearly in order.
    fn insert_position(&self, key: &SortKey) -> Option<usize> {
        for i in (0..self.list.len()).rev() {
            let existing = self.list[i].sort_key();
            match key.diff(&existing) {
                Some(0) => return None,
                Some(d) if d > 0 => return Some(i + 1),
                _ => continue,
            }
        }
        Some(0)
    }
}

impl PacketWriter for SortedQueue {
    fn write(&mut self, packet: PacketPtr) -> Result<(), Status> {
        let key = packet.sort_key();
        match self.insert_position(&key) {
            Some(pos) => {
                self.list.insert(pos, packet);
            }
            None => {
                self.n_dropped_dups += 1;
            }
        }
        Ok(())
    }
}

impl PacketReader for SortedQueue {
    fn read(&mut self, mode: ReadMode) -> Result<PacketPtr, Status> {
        match mode {
            ReadMode::Fetch => self.list.pop_front().ok_or(Status::Drain),
            ReadMode::Peek => self.list.front().cloned().ok_or(Status::Drain),
        }
    }
}
