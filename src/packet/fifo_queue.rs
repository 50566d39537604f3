//! Packet FIFO queue.
//!
//! Insertion order is preserved. Not thread safe; concurrency is handled at
//! pipeline boundaries.

use std::collections::VecDeque;

use crate::core::Status;

use super::{PacketPtr, PacketReader, PacketWriter, ReadMode};

/// FIFO queue of packets.
#[derive(Default)]
pub struct FifoQueue {
    list: VecDeque<PacketPtr>,
}

impl FifoQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// First packet without removing it.
    pub fn head(&self) -> Option<&PacketPtr> {
        self.list.front()
    }

    /// Last packet without removing it.
    pub fn tail(&self) -> Option<&PacketPtr> {
        self.list.back()
    }
}

impl PacketWriter for FifoQueue {
    fn write(&mut self, packet: PacketPtr) -> Result<(), Status> {
        self.list.push_back(packet);
        Ok(())
    }
}

impl PacketReader for FifoQueue {
    fn read(&mut self, mode: ReadMode) -> Result<PacketPtr, Status> {
        match mode {
            ReadMode::Fetch => self.list.pop_front().ok_or(Status::Drain),
            ReadMode::Peek => self.list.front().cloned().ok_or(Status::Drain),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::factory::PacketFactory;
    use std::sync::Arc;

    fn make_packets(n: usize) -> Vec<PacketPtr> {
        let factory = PacketFactory::new(64, n);
        (0..n).map(|_| factory.new_packet_ptr().unwrap()).collect()
    }

    #[test]
    fn test_empty_read_drains() {
        let mut q = FifoQueue::new();
        assert_eq!(q.read(ReadMode::Fetch).err(), Some(Status::Drain));
        assert_eq!(q.read(ReadMode::Peek).err(), Some(Status::Drain));
    }

    #[test]
    fn test_fifo_order() {
        let packets = make_packets(3);
        let mut q = FifoQueue::new();
        for p in &packets {
            q.write(p.clone()).unwrap();
        }
        assert_eq!(q.len(), 3);

        let peeked = q.read(ReadMode::Peek).unwrap();
        assert!(Arc::ptr_eq(&peeked, &packets[0]));
        assert_eq!(q.len(), 3);

        for expected in &packets {
            let got = q.read(ReadMode::Fetch).unwrap();
            assert!(Arc::ptr_eq(&got, expected));
        }
        assert!(q.is_empty());
    }
}
