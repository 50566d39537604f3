//! Sender peer.
//!
//! Connects endpoints and pushes written frames through the sender chain
//! of every complete slot. The caller's thread drives the pipeline; with
//! the internal clock source `write_frame` paces itself to the nominal
//! sample rate.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::config::{ClockSource, FecEncoding, SenderConfig};
use crate::core::Status;
use crate::fec::FecScheme;
use crate::metrics::{ConnectionMetrics, SlotMetrics};
use crate::net::{connect_socket, EndpointUri, IfaceConfig, Interface, Protocol, SenderPort};
use crate::packet::{PacketFactory, PacketPtr, PacketWriter};
use crate::pipeline::sender::ControlSink;
use crate::pipeline::{SenderPipeline, Ticker};
use crate::rtp::{Encoding, EncodingMap};

use super::slot::SlotCore;

// The pipeline owns writer ends while the peer keeps handles for metrics.
#[derive(Clone)]
struct SharedPort(Arc<Mutex<SenderPort>>);

impl PacketWriter for SharedPort {
    fn write(&mut self, packet: PacketPtr) -> Result<(), Status> {
        self.0.lock().write(packet)
    }
}

impl ControlSink for SharedPort {
    fn send_report(&mut self, data: &[u8]) -> Result<(), Status> {
        self.0.lock().send_bytes(data)
    }
}

struct SenderSlot {
    core: SlotCore,
    endpoints: HashMap<Interface, (Protocol, SharedPort)>,
    pipeline: Option<SenderPipeline>,
}

impl SenderSlot {
    fn new() -> Self {
        Self {
            core: SlotCore::new(),
            endpoints: HashMap::new(),
            pipeline: None,
        }
    }

    fn source_scheme(&self) -> Option<FecScheme> {
        self.endpoints
            .get(&Interface::AudioSource)
            .and_then(|(protocol, _)| protocol.fec_scheme())
    }

    fn is_complete(&self) -> bool {
        let (protocol, _) = match self.endpoints.get(&Interface::AudioSource) {
            Some(source) => source,
            None => return false,
        };
        match protocol.fec_scheme() {
            None => true,
            Some(scheme) => self
                .endpoints
                .get(&Interface::AudioRepair)
                .map(|(p, _)| p.fec_scheme() == Some(scheme))
                .unwrap_or(false),
        }
    }
}

/// Sending peer: connect endpoints, then write frames.
pub struct Sender {
    config: SenderConfig,
    factory: PacketFactory,
    encodings: EncodingMap,
    encoding: Encoding,
    slots: HashMap<u64, SenderSlot>,
    ticker: Option<Ticker>,
}

impl Sender {
    pub fn new(config: SenderConfig) -> Result<Self, Status> {
        let config = config.resolve()?;
        let encodings = EncodingMap::new();
        let encoding = encodings
            .find(config.payload_type)
            .ok_or(Status::BadConfig)?;
        let factory = PacketFactory::new(config.max_packet_size, config.max_packets());
        let ticker = match config.clock_source {
            ClockSource::Internal => Some(Ticker::new()),
            ClockSource::External => None,
        };
        Ok(Self {
            config,
            factory,
            encodings,
            encoding,
            slots: HashMap::new(),
            ticker,
        })
    }

    /// Register a user packet encoding and use it when it matches the
    /// configured payload type.
    pub fn register_encoding(&mut self, encoding: Encoding) -> Result<(), Status> {
        self.encodings.register(encoding)?;
        if encoding.payload_type == self.config.payload_type {
            self.encoding = encoding;
        }
        Ok(())
    }

    /// Apply interface options; must precede `connect` on that interface.
    pub fn configure(
        &mut self,
        slot: u64,
        iface: Interface,
        config: IfaceConfig,
    ) -> Result<(), Status> {
        let slot = self.slots.entry(slot).or_insert_with(SenderSlot::new);
        slot.core.configure(iface, config)
    }

    /// Connect a slot interface to a remote endpoint URI.
    pub fn connect(&mut self, slot_key: u64, iface: Interface, uri: &str) -> Result<(), Status> {
        let slot = self.slots.entry(slot_key).or_insert_with(SenderSlot::new);

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

        // validate the FEC encoding against the endpoint scheme
        let endpoint_scheme = uri.protocol.fec_scheme();
        let scheme_ok = match (iface, self.config.fec_encoding) {
            (Interface::AudioSource, FecEncoding::None) => endpoint_scheme.is_none(),
            (Interface::AudioSource, FecEncoding::FromEndpoints) => true,
            (Interface::AudioSource, enc) => endpoint_scheme == enc.scheme(),
            (Interface::AudioRepair, FecEncoding::None) => false,
            _ => true,
        };
        if !scheme_ok {
            slot.core.mark_broken();
            return Err(Status::BadConfig);
        }

        slot.core.take(iface)?;

        let remote_addr = match uri.socket_addr() {
            Ok(addr) => addr,
            Err(status) => {
                slot.core.mark_broken();
                return Err(status);
            }
        };
        let socket = match connect_socket(remote_addr, &slot.core.iface_config(iface)) {
            Ok(socket) => socket,
            Err(status) => {
                slot.core.mark_broken();
                return Err(status);
            }
        };

        let port = SharedPort(Arc::new(Mutex::new(SenderPort::new(socket, remote_addr))));
        slot.endpoints.insert(iface, (uri.protocol, port));
        debug!(slot = slot_key, %uri, "endpoint connected");
        Ok(())
    }

    /// Remove a slot and free its endpoints.
    pub fn unlink(&mut self, slot: u64) -> Result<(), Status> {
        self.slots.remove(&slot).ok_or(Status::BadInterface)?;
        Ok(())
    }

    fn ensure_pipeline(
        config: &SenderConfig,
        encoding: Encoding,
        factory: &PacketFactory,
        slot: &mut SenderSlot,
    ) -> Result<(), Status> {
        if slot.pipeline.is_some() {
            return Ok(());
        }
        let scheme = slot.source_scheme();
        let source = slot.endpoints[&Interface::AudioSource].1.clone();
        let repair = slot
            .endpoints
            .get(&Interface::AudioRepair)
            .map(|(_, port)| Box::new(port.clone()) as Box<dyn PacketWriter>);
        let control = slot
            .endpoints
            .get(&Interface::AudioControl)
            .map(|(_, port)| Box::new(port.clone()) as Box<dyn ControlSink>);

        slot.pipeline = Some(SenderPipeline::new(
            config,
            encoding,
            scheme,
            Box::new(source),
            repair,
            control,
            factory.clone(),
        )?);
        Ok(())
    }

    /// Push one frame of interleaved samples into every complete slot.
    pub fn write_frame(&mut self, samples: &[f32]) -> Result<(), Status> {
        let mut keys: Vec<u64> = self.slots.keys().copied().collect();
        keys.sort_unstable();

        for key in keys {
            let slot = self.slots.get_mut(&key).expect("slot exists");
            if slot.core.is_broken() || !slot.is_complete() {
                continue;
            }
            if let Err(status) =
                Self::ensure_pipeline(&self.config, self.encoding, &self.factory, slot)
            {
                slot.core.mark_broken();
                return Err(status);
            }
            slot.pipeline
                .as_mut()
                .expect("just built")
                .write_frame(samples)?;
        }

        if let Some(ticker) = self.ticker.as_mut() {
            let spec = self.encoding.spec;
            let n_frames = (samples.len() / spec.channels as usize) as u32;
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
        let connected = slot.pipeline.is_some();
        slot_sink(&SlotMetrics {
            connection_count: usize::from(connected),
        });
        if connected && max_conn > 0 {
            let pipeline = slot.pipeline.as_ref().expect("checked");
            conn_sink(&ConnectionMetrics {
                source_id: pipeline.source_id(),
                expected_packets: pipeline.n_packets(),
                ..Default::default()
            });
        }
        Ok(())
    }
}
