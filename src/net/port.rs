//! Per-endpoint UDP ports.
//!
//! A receiver port owns a socket and a thread that drains it, parses
//! datagrams according to the endpoint protocol, and pushes packets into
//! the slot's inbound queue. No pipeline logic runs on the network thread.
//! A sender port is the passive counterpart: a connected socket behind the
//! packet writer contract.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, trace};

use crate::core::Status;
use crate::fec::wire;
use crate::packet::{
    ConcurrentQueueWriter, FecInfo, PacketFactory, PacketPtr, PacketWriter, UdpInfo,
    FLAG_COMPOSED, FLAG_REPAIR, FLAG_UDP,
};
use crate::rtp::{compose_header, parse_packet};

use super::endpoint_uri::Protocol;

/// Receive-side statistics, shared with the owner.
#[derive(Default)]
pub struct PortStats {
    pub received: AtomicU64,
    pub dropped: AtomicU64,
}

/// Bound endpoint with its receive thread.
pub struct ReceiverPort {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
    stats: Arc<PortStats>,
}

impl ReceiverPort {
    /// Start draining `socket`, parsing per `protocol`, writing into
    /// `queue`.
    pub fn start(
        socket: UdpSocket,
        protocol: Protocol,
        factory: PacketFactory,
        queue: ConcurrentQueueWriter,
    ) -> Result<Self, Status> {
        let local_addr = socket.local_addr().map_err(|_| Status::BadInterface)?;
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(PortStats::default());

        let thread_running = Arc::clone(&running);
        let thread_stats = Arc::clone(&stats);
        let thread = thread::Builder::new()
            .name(format!("net-rx-{}", local_addr.port()))
            .spawn(move || {
                receive_loop(socket, protocol, factory, queue, thread_running, thread_stats);
            })
            .map_err(|_| Status::NoMem)?;

        debug!(%local_addr, protocol = protocol.scheme(), "receiver port started");
        Ok(Self {
            running,
            thread: Some(thread),
            local_addr,
            stats,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn received(&self) -> u64 {
        self.stats.received.load(Ordering::Relaxed)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ReceiverPort {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop(
    socket: UdpSocket,
    protocol: Protocol,
    factory: PacketFactory,
    mut queue: ConcurrentQueueWriter,
    running: Arc<AtomicBool>,
    stats: Arc<PortStats>,
) {
    let local_addr = socket.local_addr().ok();
    let mut buf = [0u8; 65536];

    while running.load(Ordering::SeqCst) {
        let (len, src_addr) = match socket.recv_from(&mut buf) {
            Ok(r) => r,
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(_) => break,
        };

        let packet = match parse_datagram(&factory, protocol, &buf[..len], src_addr, local_addr) {
            Some(packet) => packet,
            None => {
                stats.dropped.fetch_add(1, Ordering::Relaxed);
                trace!(len, "dropping malformed datagram");
                continue;
            }
        };

        stats.received.fetch_add(1, Ordering::Relaxed);
        if queue.write(packet).is_err() {
            break;
        }
    }

    queue.close();
}

fn parse_datagram(
    factory: &PacketFactory,
    protocol: Protocol,
    data: &[u8],
    src_addr: SocketAddr,
    local_addr: Option<SocketAddr>,
) -> Option<PacketPtr> {
    if data.is_empty() || data.len() > factory.max_packet_size() {
        return None;
    }
    let mut packet = factory.new_packet().ok()?;
    packet.buffer_mut().extend_from_slice(data);
    if let Some(dst) = local_addr {
        packet.set_udp(UdpInfo {
            src_addr,
            dst_addr: dst,
        });
    }

    match protocol.interface() {
        super::Interface::AudioSource => {
            parse_packet(&mut packet, protocol.fec_scheme())?;
        }
        super::Interface::AudioRepair => {
            let scheme = protocol.fec_scheme()?;
            let fields = wire::parse_repair_header(scheme, data)?;
            let hlen = wire::repair_header_len(scheme);
            packet.set_fec(FecInfo {
                scheme,
                sbn: fields.sbn,
                esi: fields.esi,
                sbl: fields.sbl,
                nes: fields.nes,
                payload: hlen..data.len(),
            });
            packet.add_flags(FLAG_REPAIR);
        }
        super::Interface::AudioControl => {
            // control payloads are parsed on the pipeline thread
            packet.add_flags(FLAG_UDP);
        }
    }
    Some(Arc::new(packet))
}

/// Connected endpoint behind the packet writer contract.
pub struct SenderPort {
    socket: UdpSocket,
    remote_addr: SocketAddr,
    n_sent: u64,
}

impl SenderPort {
    pub fn new(socket: UdpSocket, remote_addr: SocketAddr) -> Self {
        Self {
            socket,
            remote_addr,
            n_sent: 0,
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn n_sent(&self) -> u64 {
        self.n_sent
    }

    /// Send raw bytes (control payloads).
    pub fn send_bytes(&mut self, data: &[u8]) -> Result<(), Status> {
        self.socket.send(data).map_err(|_| Status::BadInterface)?;
        self.n_sent += 1;
        Ok(())
    }
}

impl PacketWriter for SenderPort {
    fn write(&mut self, mut packet: PacketPtr) -> Result<(), Status> {
        if !packet.has_flags(FLAG_COMPOSED) {
            let p = Arc::make_mut(&mut packet);
            compose_header(p);
        }
        self.socket
            .send(packet.buffer())
            .map_err(|_| Status::BadInterface)?;
        self.n_sent += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::socket::{bind_socket, connect_socket, IfaceConfig};
    use crate::packet::{ConcurrentQueue, PacketReader, ReadMode, RtpInfo};
    use crate::rtp::HEADER_SIZE;
    use std::time::{Duration, Instant};

    fn wait_packet(queue: &mut ConcurrentQueue) -> PacketPtr {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            match queue.read(ReadMode::Fetch) {
                Ok(p) => return p,
                Err(_) => {
                    assert!(Instant::now() < deadline, "timed out waiting for packet");
                    thread::sleep(Duration::from_millis(5));
                }
            }
        }
    }

    #[test]
    fn test_rtp_over_loopback() {
        let factory = PacketFactory::new(2048, 64);
        let (writer, mut reader) = ConcurrentQueue::new(false);

        let socket = bind_socket("127.0.0.1:0".parse().unwrap(), &IfaceConfig::default()).unwrap();
        let addr = socket.local_addr().unwrap();
        let mut port =
            ReceiverPort::start(socket, Protocol::Rtp, factory.clone(), writer).unwrap();

        // compose a source packet and push it through a sender port
        let mut p = factory.new_packet().unwrap();
        p.buffer_mut().resize(HEADER_SIZE + 8, 0x5A);
        p.buffer_mut()[..HEADER_SIZE].fill(0);
        p.set_rtp(RtpInfo {
            payload_type: 10,
            source_id: 123,
            seqnum: 9,
            stream_ts: 1000,
            capture_ts: 0,
            duration: 2,
            payload: HEADER_SIZE..HEADER_SIZE + 8,
        });
        p.add_flags(crate::packet::FLAG_AUDIO);

        let out_socket = connect_socket(addr, &IfaceConfig::default()).unwrap();
        let mut sender = SenderPort::new(out_socket, addr);
        sender.write(Arc::new(p)).unwrap();

        let got = wait_packet(&mut reader);
        let rtp = got.rtp().unwrap();
        assert_eq!(rtp.seqnum, 9);
        assert_eq!(rtp.source_id, 123);
        assert_eq!(got.payload(), &[0x5A; 8]);
        assert!(got.udp().is_some());

        port.stop();
    }

    #[test]
    fn test_malformed_datagram_dropped() {
        let factory = PacketFactory::new(2048, 64);
        let (writer, mut reader) = ConcurrentQueue::new(false);

        let socket = bind_socket("127.0.0.1:0".parse().unwrap(), &IfaceConfig::default()).unwrap();
        let addr = socket.local_addr().unwrap();
        let mut port =
            ReceiverPort::start(socket, Protocol::Rtp, factory.clone(), writer).unwrap();

        let sender = connect_socket(addr, &IfaceConfig::default()).unwrap();
        sender.send(&[1, 2, 3]).unwrap(); // too short for RTP

        thread::sleep(Duration::from_millis(100));
        assert!(reader.read(ReadMode::Fetch).is_err());

        port.stop();
    }
}
