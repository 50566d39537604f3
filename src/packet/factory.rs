//! Packet factory backed by bounded pools.

use std::sync::Arc;

use crate::core::{BufferPool, Status};

use super::{Packet, PacketPtr};

/// Produces packets with pooled byte buffers.
///
/// Shared across threads; allocation is serialized inside the pools.
#[derive(Clone)]
pub struct PacketFactory {
    buffer_pool: BufferPool,
}

impl PacketFactory {
    /// `max_packet_size` bounds the wire size of any packet; `max_packets`
    /// bounds how many packets may be alive at once.
    pub fn new(max_packet_size: usize, max_packets: usize) -> Self {
        Self {
            buffer_pool: BufferPool::new(max_packet_size, max_packets),
        }
    }

    /// Allocate an empty packet. `Err(NoMem)` when the pool is exhausted.
    pub fn new_packet(&self) -> Result<Packet, Status> {
        let buffer = self.buffer_pool.allocate().ok_or(Status::NoMem)?;
        Ok(Packet::new(buffer))
    }

    /// Allocate a packet and share it immediately.
    pub fn new_packet_ptr(&self) -> Result<PacketPtr, Status> {
        Ok(Arc::new(self.new_packet()?))
    }

    pub fn max_packet_size(&self) -> usize {
        self.buffer_pool.buf_capacity()
    }

    /// Packets currently alive.
    pub fn outstanding(&self) -> usize {
        self.buffer_pool.outstanding()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_allocation() {
        let factory = PacketFactory::new(128, 2);
        let a = factory.new_packet().unwrap();
        let b = factory.new_packet().unwrap();
        assert_eq!(factory.new_packet().err(), Some(Status::NoMem));
        drop(a);
        let c = factory.new_packet();
        assert!(c.is_ok());
        drop(b);
        drop(c);
        assert_eq!(factory.outstanding(), 0);
    }
}
