//! Sender pipeline.
//!
//! The inverse of the receive chain: written frames are packetized, FEC
//! protected when the slot carries a repair endpoint, and routed to the
//! bound interfaces. Sender reports with the capture/rtp mapping go out
//! periodically over the control interface.

use tracing::debug;

use crate::audio::Packetizer;
use crate::config::SenderConfig;
use crate::core::time::{now_unix_ns, Nanos};
use crate::core::Status;
use crate::fec::{BlockWriter, CodecMap, FecScheme};
use crate::packet::{PacketFactory, PacketPtr, PacketWriter, FLAG_REPAIR};
use crate::rtcp;
use crate::rtp::Encoding;

/// Outbound control feedback sink (RTCP).
pub trait ControlSink: Send {
    fn send_report(&mut self, data: &[u8]) -> Result<(), Status>;
}

// Splits the interleaved source+repair stream onto the two interfaces.
struct InterfaceRouter {
    source: Box<dyn PacketWriter>,
    repair: Option<Box<dyn PacketWriter>>,
}

impl PacketWriter for InterfaceRouter {
    fn write(&mut self, packet: PacketPtr) -> Result<(), Status> {
        if packet.has_flags(FLAG_REPAIR) {
            match &mut self.repair {
                Some(repair) => repair.write(packet),
                None => Err(Status::BadInterface),
            }
        } else {
            self.source.write(packet)
        }
    }
}

/// Frame-push pipeline of one sender slot.
pub struct SenderPipeline {
    packetizer: Packetizer,
    encoding: Encoding,

    control: Option<Box<dyn ControlSink>>,
    report_interval: Nanos,
    last_report: Nanos,

    /// Pipeline position in nanoseconds, advanced by written frames.
    position: Nanos,
    n_octets: u64,
    report_buf: Vec<u8>,
}

impl SenderPipeline {
    /// Build the chain. `repair_writer` must be given iff `fec_scheme` is.
    pub fn new(
        config: &SenderConfig,
        encoding: Encoding,
        fec_scheme: Option<FecScheme>,
        source_writer: Box<dyn PacketWriter>,
        repair_writer: Option<Box<dyn PacketWriter>>,
        control: Option<Box<dyn ControlSink>>,
        factory: PacketFactory,
    ) -> Result<Self, Status> {
        if fec_scheme.is_some() != repair_writer.is_some() {
            return Err(Status::BadInterface);
        }

        let router = InterfaceRouter {
            source: source_writer,
            repair: repair_writer,
        };

        let packet_writer: Box<dyn PacketWriter> = match fec_scheme {
            Some(scheme) => {
                let encoder = CodecMap::new_encoder(scheme)?;
                Box::new(BlockWriter::new(
                    config.fec_writer,
                    scheme,
                    encoder,
                    Box::new(router),
                    factory.clone(),
                )?)
            }
            None => Box::new(router),
        };

        let packetizer = Packetizer::new(
            packet_writer,
            factory,
            encoding,
            config.packet_length,
        )?;

        debug!(
            ssrc = packetizer.source_id(),
            ?fec_scheme,
            "creating sender pipeline"
        );

        Ok(Self {
            packetizer,
            encoding,
            control,
            report_interval: config.report_interval,
            last_report: 0,
            position: 0,
            n_octets: 0,
            report_buf: Vec::new(),
        })
    }

    pub fn source_id(&self) -> u32 {
        self.packetizer.source_id()
    }

    pub fn n_packets(&self) -> u64 {
        self.packetizer.n_packets()
    }

    /// Push interleaved samples captured "now" into the pipeline.
    pub fn write_frame(&mut self, samples: &[f32]) -> Result<(), Status> {
        let capture_ts = now_unix_ns();
        self.packetizer.write(samples, capture_ts)?;

        let channels = self.encoding.spec.channels as usize;
        self.position += self
            .encoding
            .spec
            .samples_to_ns((samples.len() / channels) as u32);
        self.n_octets += (samples.len() * 2) as u64;

        if self.control.is_some() && self.position - self.last_report >= self.report_interval {
            self.last_report = self.position;
            self.send_report()?;
        }
        Ok(())
    }

    fn send_report(&mut self) -> Result<(), Status> {
        let (rtp_ts, capture_ts) = self.packetizer.mapping();
        let cts = if capture_ts > 0 {
            capture_ts
        } else {
            now_unix_ns()
        };
        let sr = rtcp::SenderReport {
            ssrc: self.packetizer.source_id(),
            ntp_ts: rtcp::unix_to_ntp(cts),
            rtp_ts,
            packet_count: self.packetizer.n_packets() as u32,
            octet_count: self.n_octets as u32,
        };
        rtcp::compose_sr(&sr, &mut self.report_buf);
        let buf = std::mem::take(&mut self.report_buf);
        let result = match &mut self.control {
            Some(control) => control.send_report(&buf),
            None => Ok(()),
        };
        self.report_buf = buf;
        result
    }
}
