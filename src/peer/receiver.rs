//! Receiver peer.
//!
//! Binds endpoints, hosts one session group per slot, and delivers mixed
//! frames to the caller. The caller's thread is the pipeline thread: every
//! `read_frame` drains the inbound queues, routes packets to sessions and
//! pulls one frame through the chains. With the internal clock source the
//! call also paces itself to the nominal sample rate.

use std::collections::HashMap;
use std::net::SocketAddr;

use tracing::{debug, warn};

use crate::audio::Frame;
use crate::config::{ClockSource, ReceiverConfig};
use crate::core::Status;
use crate::fec::FecScheme;
use crate::metrics::{ConnectionMetrics, SlotMetrics};
use crate::net::{bind_socket, EndpointUri, Interface, Protocol, ReceiverPort};
use crate::net::IfaceConfig;
use crate::packet::{ConcurrentQueue, PacketFactory, PacketReader, ReadMode};
use crate::pipeline::{ReceiverSessionGroup, Ticker};
use crate::rtp::{Encoding, EncodingMap};

use super::slot::SlotCore;

struct ReceiverEndpoint {
    protocol: Protocol,
    port: ReceiverPort,
    queue: ConcurrentQueue,
}

struct ReceiverSlot {
    core: SlotCore,
    endpoints: HashMap<Interface, ReceiverEndpoint>,
    group: Option<ReceiverSessionGroup>,
}

impl ReceiverSlot {
    fn new() -> Self {
        Self {
            core: SlotCore::new(),
            endpoints: HashMap::new(),
            group: None,
        }
    }

    fn source_scheme(&self) -> Option<FecScheme> {
        self.endpoints
            .get(&Interface::AudioSource)
            .and_then(|e| e.protocol.fec_scheme())
    }

    // FEC enabled => both source and repair must be bound with matching
    // schemes before the slot starts receiving.
    fn is_complete(&self) -> bool {
        let source = match self.endpoints.get(&Interface::AudioSource) {
            Some(source) => source,
            None => return false,
        };
        match source.protocol.fec_scheme() {
            None => true,
            Some(scheme) => self
                .endpoints
                .get(&Interface::AudioRepair)
                .map(|r| r.protocol.fec_scheme() == Some(scheme))
                .unwrap_or(false),
        }
    }
}

/// Receiving peer: bind endpoints, then read mixed frames.
pub struct Receiver {
    config: ReceiverConfig,
    factory: PacketFactory,
    encodings: EncodingMap,
    slots: HashMap<u64, ReceiverSlot>,
    ticker: Option<Ticker>,
    scratch: Frame,
}

impl Receiver {
    pub fn new(config: ReceiverConfig) -> Result<Self, Status> {
        let config = config.resolve()?;
        let factory = PacketFactory::new(config.max_packet_size, config.max_packets());
        let ticker = match config.clock_source {
            ClockSource::Internal => Some(Ticker::new()),
            ClockSource::External => None,
        };
        Ok(Self {
            config,
            factory,
            encodings: EncodingMap::new(),
            slots: HashMap::new(),
            ticker,
            scratch: Frame::new(),
        })
    }

    /// Register a user packet encoding (payload types 100..=127).
    pub fn register_encoding(&mut self, encoding: Encoding) -> Result<(), Status> {
        self.encodings.register(encoding)
    }

    /// Apply interface options; must precede `bind` on that interface.
    pub fn configure(
        &mut self,
        slot: u64,
        iface: Interface,
        config: IfaceConfig,
    ) -> Result<(), Status> {
        let slot = self.slots.entry(slot).or_insert_with(ReceiverSlot::new);
        slot.core.configure(iface, config)
    }

    /// Bind an endpoint URI to a slot interface; returns the actual local
    /// address (useful with port 0).
    pub fn bind(&mut self, slot_key: u64, iface: Interface, uri: &str) -> Result<SocketAddr, Status> {
        let slot = self.slots.entry(slot_key).or_insert_with(ReceiverSlot::new);

        let uri = match EndpointUri::parse(uri) {
            Ok(uri) => uri,
            Err(status) => {
                slot.core.mark_broken();
                return Err(status);
            }
        };
        if uri.protocol.interface() != iface {
            slot.core.mark_broken();
            return Err(Status::BadInterface);
        }

        // schemes of the media interfaces must agree within the slot
        let consistent = match iface {
            Interface::AudioSource => slot
                .endpoints
                .get(&Interface::AudioRepair)
                .map(|r| r.protocol.fec_scheme() == uri.protocol.fec_scheme())
                .unwrap_or(true),
            Interface::AudioRepair => slot
                .endpoints
                .get(&Interface::AudioSource)
                .map(|s| s.protocol.fec_scheme() == uri.protocol.fec_scheme())
                .unwrap_or(true),
            Interface::AudioControl => true,
        };
        if !consistent {
            slot.core.mark_broken();
            return Err(Status::BadConfig);
        }

        slot.core.take(iface)?;

        let bind_addr = match uri.socket_addr() {
            Ok(addr) => addr,
            Err(status) => {
                slot.core.mark_broken();
                return Err(status);
            }
        };
        let socket = match bind_socket(bind_addr, &slot.core.iface_config(iface)) {
            Ok(socket) => socket,
            Err(status) => {
                slot.core.mark_broken();
                return Err(status);
            }
        };

        let (writer, queue) = ConcurrentQueue::new(false);
        let port = ReceiverPort::start(socket, uri.protocol, self.factory.clone(), writer)?;
        let local_addr = port.local_addr();

        slot.endpoints.insert(
            iface,
            ReceiverEndpoint {
                protocol: uri.protocol,
                port,
                queue,
            },
        );

        if slot.is_complete() && slot.group.is_none() {
            slot.group = Some(ReceiverSessionGroup::new(
                self.config,
                self.factory.clone(),
                slot.source_scheme(),
            ));
            debug!(slot = slot_key, "slot complete, receiving enabled");
        }

        Ok(local_addr)
    }

    /// Remove a slot and free its endpoints. The only operation a broken
    /// slot accepts.
    pub fn unlink(&mut self, slot: u64) -> Result<(), Status> {
        let mut slot = self.slots.remove(&slot).ok_or(Status::BadInterface)?;
        for (_, mut endpoint) in slot.endpoints.drain() {
            endpoint.port.stop();
        }
        if let Some(group) = slot.group.as_mut() {
            group.close();
        }
        Ok(())
    }

    /// Read one mixed frame of interleaved samples from all slots.
    pub fn read_frame(&mut self, samples: &mut [f32]) -> Result<(), Status> {
        let n_samples = samples.len();
        samples.iter_mut().for_each(|s| *s = 0.0);

        let mut keys: Vec<u64> = self.slots.keys().copied().collect();
        keys.sort_unstable();

        for key in keys {
            let slot = self.slots.get_mut(&key).expect("slot exists");
            if slot.core.is_broken() || slot.group.is_none() {
                continue;
            }

            // move everything the network threads queued into the sessions
            let mut routing_failed = false;
            for (&iface, endpoint) in slot.endpoints.iter_mut() {
                loop {
                    let packet = match endpoint.queue.read(ReadMode::Fetch) {
                        Ok(packet) => packet,
                        Err(Status::Drain) | Err(Status::NoData) => break,
                        Err(_) => break,
                    };
                    let group = slot.group.as_mut().expect("checked above");
                    if let Err(status) = group.route_packet(iface, packet, &self.encodings) {
                        warn!(slot = key, %status, "routing failed, breaking slot");
                        routing_failed = true;
                        break;
                    }
                }
            }
            if routing_failed {
                slot.core.mark_broken();
                continue;
            }

            let group = slot.group.as_mut().expect("checked above");
            group.read_frame(&mut self.scratch, n_samples)?;
            for (out, s) in samples.iter_mut().zip(self.scratch.samples.iter()) {
                *out = (*out + *s).clamp(-1.0, 1.0);
            }
        }

        if let Some(ticker) = self.ticker.as_mut() {
            let spec = self.config.frame_spec();
            let n_frames = (n_samples / spec.channels as usize) as u32;
            ticker.wait_frame(spec.samples_to_ns(n_frames));
        }
        Ok(())
    }

    /// Query metrics of one slot through sink callbacks.
    pub fn query_metrics(
        &self,
        slot: u64,
        slot_sink: &mut dyn FnMut(&SlotMetrics),
        conn_sink: &mut dyn FnMut(&ConnectionMetrics),
        max_conn: usize,
    ) -> Result<(), Status> {
        let slot = self.slots.get(&slot).ok_or(Status::BadInterface)?;
        match &slot.group {
            Some(group) => group.query_metrics(slot_sink, conn_sink, max_conn),
            None => slot_sink(&SlotMetrics::default()),
        }
        Ok(())
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        let keys: Vec<u64> = self.slots.keys().copied().collect();
        for key in keys {
            let _ = self.unlink(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receiver() -> Receiver {
        let config = ReceiverConfig {
            clock_source: ClockSource::External,
            ..Default::default()
        };
        Receiver::new(config).unwrap()
    }

    #[test]
    fn test_bind_assigns_port() {
        let mut r = receiver();
        let addr = r.bind(0, Interface::AudioSource, "rtp://127.0.0.1:0").unwrap();
        assert_ne!(addr.port(), 0);
        r.unlink(0).unwrap();
    }

    #[test]
    fn test_interface_protocol_mismatch() {
        let mut r = receiver();
        let err = r.bind(0, Interface::AudioRepair, "rtp://127.0.0.1:0").err();
        assert_eq!(err, Some(Status::BadInterface));
        // slot is broken now; further binds fail, unlink works
        let err = r.bind(0, Interface::AudioSource, "rtp://127.0.0.1:0").err();
        assert_eq!(err, Some(Status::BadConfig));
        r.unlink(0).unwrap();
    }

    #[test]
    fn test_configure_after_bind_breaks_slot() {
        let mut r = receiver();
        r.bind(0, Interface::AudioSource, "rtp://127.0.0.1:0").unwrap();
        let err = r
            .configure(0, Interface::AudioSource, IfaceConfig::default())
            .err();
        assert_eq!(err, Some(Status::BadConfig));
        r.unlink(0).unwrap();
        // the key is reusable after unlink
        r.bind(0, Interface::AudioSource, "rtp://127.0.0.1:0").unwrap();
    }

    #[test]
    fn test_fec_slot_requires_both_interfaces() {
        let mut r = receiver();
        r.bind(0, Interface::AudioSource, "rtp+rs8m://127.0.0.1:0")
            .unwrap();
        assert!(r.slots[&0].group.is_none());
        r.bind(0, Interface::AudioRepair, "rs8m://127.0.0.1:0").unwrap();
        assert!(r.slots[&0].group.is_some());
    }

    #[test]
    fn test_scheme_mismatch_rejected() {
        let mut r = receiver();
        r.bind(0, Interface::AudioSource, "rtp+rs8m://127.0.0.1:0")
            .unwrap();
        let err = r.bind(0, Interface::AudioRepair, "ldpc://127.0.0.1:0").err();
        assert_eq!(err, Some(Status::BadConfig));
    }

    #[test]
    fn test_metrics_on_unknown_slot() {
        let r = receiver();
        let mut called = false;
        let err = r
            .query_metrics(7, &mut |_| called = true, &mut |_| {}, 4)
            .err();
        assert_eq!(err, Some(Status::BadInterface));
        assert!(!called);
    }

    #[test]
    fn test_read_frame_without_slots() {
        let mut r = receiver();
        let mut samples = vec![0.5f32; 64];
        r.read_frame(&mut samples).unwrap();
        assert!(samples.iter().all(|&s| s == 0.0));
    }
}
