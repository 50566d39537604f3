//! Single-producer single-consumer packet queue for the network boundary.
//!
//! The network thread writes, the pipeline thread reads. Writes never block;
//! reads either return `Drain` or, in the blocking variant, wait for a packet
//! or for shutdown. Tracks the summed duration of queued audio packets so the
//! latency tuner can estimate the incoming queue depth without walking it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::core::Status;

use super::{PacketPtr, PacketReader, PacketWriter, ReadMode};

struct Shared {
    list: Mutex<VecDeque<PacketPtr>>,
    available: Condvar,
    closed: AtomicBool,
    /// Sum of `duration` over queued packets, in samples.
    queued_samples: AtomicU64,
}

/// Writer half, held by the network thread.
#[derive(Clone)]
pub struct ConcurrentQueueWriter {
    shared: Arc<Shared>,
}

/// Reader half, held by the pipeline thread.
pub struct ConcurrentQueue {
    shared: Arc<Shared>,
    blocking: bool,
}

impl ConcurrentQueue {
    /// Create the queue; `blocking` selects whether empty reads wait.
    pub fn new(blocking: bool) -> (ConcurrentQueueWriter, ConcurrentQueue) {
        let shared = Arc::new(Shared {
            list: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            closed: AtomicBool::new(false),
            queued_samples: AtomicU64::new(0),
        });
        (
            ConcurrentQueueWriter {
                shared: Arc::clone(&shared),
            },
            ConcurrentQueue {
                shared,
                blocking,
            },
        )
    }

    /// Samples buffered in the queue right now.
    pub fn queued_samples(&self) -> u64 {
        self.shared.queued_samples.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.shared.list.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

impl ConcurrentQueueWriter {
    /// Mark the stream finished; subsequent reads return `NoData` once the
    /// queue drains.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.available.notify_all();
    }

    /// Samples buffered in the queue right now.
    pub fn queued_samples(&self) -> u64 {
        self.shared.queued_samples.load(Ordering::Relaxed)
    }
}

impl PacketWriter for ConcurrentQueueWriter {
    fn write(&mut self, packet: PacketPtr) -> Result<(), Status> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(Status::NoData);
        }
        let duration = packet.rtp().map(|r| r.duration as u64).unwrap_or(0);
        {
            let mut list = self.shared.list.lock();
            list.push_back(packet);
        }
        self.shared
            .queued_samples
            .fetch_add(duration, Ordering::Relaxed);
        self.shared.available.notify_one();
        Ok(())
    }
}

impl PacketReader for ConcurrentQueue {
    fn read(&mut self, mode: ReadMode) -> Result<PacketPtr, Status> {
        let mut list = self.shared.list.lock();

        if self.blocking && mode == ReadMode::Fetch {
            while list.is_empty() && !self.shared.closed.load(Ordering::SeqCst) {
                self.shared
                    .available
                    .wait_for(&mut list, Duration::from_millis(100));
            }
        }

        match mode {
            ReadMode::Peek => list.front().cloned().ok_or_else(|| {
                if self.shared.closed.load(Ordering::SeqCst) {
                    Status::NoData
                } else {
                    Status::Drain
                }
            }),
            ReadMode::Fetch => match list.pop_front() {
                Some(packet) => {
                    let duration = packet.rtp().map(|r| r.duration as u64).unwrap_or(0);
                    self.shared
                        .queued_samples
                        .fetch_sub(duration, Ordering::Relaxed);
                    Ok(packet)
                }
                None => {
                    if self.shared.closed.load(Ordering::SeqCst) {
                        Err(Status::NoData)
                    } else {
                        Err(Status::Drain)
                    }
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::factory::PacketFactory;
    use crate::packet::RtpInfo;
    use std::sync::Arc as StdArc;

    fn audio_packet(factory: &PacketFactory, seqnum: u16, duration: u32) -> PacketPtr {
        let mut p = factory.new_packet().unwrap();
        p.set_rtp(RtpInfo {
            seqnum,
            duration,
            ..Default::default()
        });
        StdArc::new(p)
    }

    #[test]
    fn test_spsc_transfer() {
        let factory = PacketFactory::new(64, 64);
        let (mut w, mut r) = ConcurrentQueue::new(false);

        for sn in 0..10u16 {
            w.write(audio_packet(&factory, sn, 160)).unwrap();
        }
        assert_eq!(r.queued_samples(), 1600);

        for sn in 0..10u16 {
            let p = r.read(ReadMode::Fetch).unwrap();
            assert_eq!(p.rtp().unwrap().seqnum, sn);
        }
        assert_eq!(r.read(ReadMode::Fetch).err(), Some(Status::Drain));
        assert_eq!(r.queued_samples(), 0);
    }

    #[test]
    fn test_close_yields_no_data() {
        let factory = PacketFactory::new(64, 8);
        let (mut w, mut r) = ConcurrentQueue::new(false);
        w.write(audio_packet(&factory, 0, 160)).unwrap();
        w.close();

        assert!(r.read(ReadMode::Fetch).is_ok());
        assert_eq!(r.read(ReadMode::Fetch).err(), Some(Status::NoData));
        assert_eq!(w.write(audio_packet(&factory, 1, 160)).err(), Some(Status::NoData));
    }

    #[test]
    fn test_cross_thread() {
        let factory = PacketFactory::new(64, 64);
        let (mut w, mut r) = ConcurrentQueue::new(true);

        let handle = std::thread::spawn(move || {
            for sn in 0..32u16 {
                w.write(audio_packet(&factory, sn, 48)).unwrap();
            }
            w.close();
        });

        let mut got = 0u16;
        loop {
            match r.read(ReadMode::Fetch) {
                Ok(p) => {
                    assert_eq!(p.rtp().unwrap().seqnum, got);
                    got += 1;
                }
                Err(Status::Drain) => continue,
                Err(Status::NoData) => break,
                Err(other) => panic!("unexpected status: {other}"),
            }
        }
        assert_eq!(got, 32);
        handle.join().unwrap();
    }
}
