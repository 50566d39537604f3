//! Receiver session group.
//!
//! Routes inbound packets to per-sender sessions (creating sessions on the
//! first validated packet of a new ssrc), feeds control reports into the
//! timestamp injectors, and mixes all session outputs into one frame.

use std::collections::HashMap;
use std::net::SocketAddr;

use tracing::{debug, warn};

use crate::audio::{Frame, FrameReader, Mixer};
use crate::config::ReceiverConfig;
use crate::core::time::now_unix_ns;
use crate::core::Status;
use crate::fec::FecScheme;
use crate::metrics::{ConnectionMetrics, SlotMetrics};
use crate::net::Interface;
use crate::packet::{PacketFactory, PacketPtr, FLAG_RTP};
use crate::rtcp;
use crate::rtp::EncodingMap;

use super::session::ReceiverSession;

/// Sessions of one slot, keyed by ssrc.
pub struct ReceiverSessionGroup {
    config: ReceiverConfig,
    factory: PacketFactory,
    fec_scheme: Option<FecScheme>,

    sessions: HashMap<u32, ReceiverSession>,
    /// Maps remote addresses to ssrc so repair streams (which carry no
    /// ssrc) find their session.
    addr_index: HashMap<SocketAddr, u32>,

    mixer: Mixer,
    n_terminated: u64,
    n_unrouted: u64,
}

impl ReceiverSessionGroup {
    pub fn new(
        config: ReceiverConfig,
        factory: PacketFactory,
        fec_scheme: Option<FecScheme>,
    ) -> Self {
        Self {
            config,
            factory,
            fec_scheme,
            sessions: HashMap::new(),
            addr_index: HashMap::new(),
            mixer: Mixer::new(),
            n_terminated: 0,
            n_unrouted: 0,
        }
    }

    pub fn n_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn n_terminated(&self) -> u64 {
        self.n_terminated
    }

    /// Route one inbound packet from the given interface.
    pub fn route_packet(
        &mut self,
        iface: Interface,
        packet: PacketPtr,
        encodings: &EncodingMap,
    ) -> Result<(), Status> {
        match iface {
            Interface::AudioSource => self.route_source(packet, encodings),
            Interface::AudioRepair => self.route_repair(packet),
            Interface::AudioControl => self.route_control(packet),
        }
    }

    fn route_source(
        &mut self,
        packet: PacketPtr,
        encodings: &EncodingMap,
    ) -> Result<(), Status> {
        let rtp = match packet.rtp() {
            Some(rtp) if packet.has_flags(FLAG_RTP) => rtp.clone(),
            _ => {
                self.n_unrouted += 1;
                return Ok(());
            }
        };

        if !self.sessions.contains_key(&rtp.source_id) {
            // a session spawns on the first packet with a known encoding
            let encoding = match encodings.find(rtp.payload_type) {
                Some(encoding) => encoding,
                None => {
                    self.n_unrouted += 1;
                    return Ok(());
                }
            };
            let session = ReceiverSession::new(
                &self.config,
                encoding,
                rtp.source_id,
                self.fec_scheme,
                self.factory.clone(),
            )?;
            debug!(ssrc = rtp.source_id, "participant connected");
            self.sessions.insert(rtp.source_id, session);
        }

        if let Some(udp) = packet.udp() {
            self.addr_index.insert(udp.src_addr, rtp.source_id);
        }

        self.sessions
            .get_mut(&rtp.source_id)
            .expect("just inserted")
            .write_source_packet(packet)
    }

    fn route_repair(&mut self, packet: PacketPtr) -> Result<(), Status> {
        // repair packets carry no ssrc; route by source address, falling
        // back to the only session in the common unicast case
        let ssrc = packet
            .udp()
            .and_then(|udp| self.addr_index.get(&udp.src_addr).copied())
            .or_else(|| {
                if self.sessions.len() == 1 {
                    self.sessions.keys().next().copied()
                } else {
                    None
                }
            });

        match ssrc.and_then(|ssrc| self.sessions.get_mut(&ssrc)) {
            Some(session) => session.write_repair_packet(packet),
            None => {
                self.n_unrouted += 1;
                Ok(())
            }
        }
    }

    fn route_control(&mut self, packet: PacketPtr) -> Result<(), Status> {
        let sr = match rtcp::parse_sr(packet.buffer()) {
            Some(sr) => sr,
            None => {
                self.n_unrouted += 1;
                return Ok(());
            }
        };
        if let Some(session) = self.sessions.get_mut(&sr.ssrc) {
            let capture_ts = rtcp::ntp_to_unix(sr.ntp_ts);
            session.update_mapping(capture_ts, sr.rtp_ts);
        }
        Ok(())
    }

    /// Mix all sessions into `frame`. Failed sessions are removed; their
    /// audio leaves the mix as a zero-fill gap.
    pub fn read_frame(&mut self, frame: &mut Frame, n_samples: usize) -> Result<(), Status> {
        let mut readers: Vec<(u32, &mut ReceiverSession)> = self
            .sessions
            .iter_mut()
            .map(|(&ssrc, session)| (ssrc, session))
            .collect();
        // deterministic mix order
        readers.sort_by_key(|(ssrc, _)| *ssrc);
        let ssrc_order: Vec<u32> = readers.iter().map(|(ssrc, _)| *ssrc).collect();

        let mut handles: Vec<&mut dyn FrameReader> = readers
            .iter_mut()
            .map(|(_, session)| &mut **session as &mut dyn FrameReader)
            .collect();

        let failures = self.mixer.mix(&mut handles, frame, n_samples);
        drop(handles);
        drop(readers);

        let failed_ssrcs: Vec<u32> = failures
            .iter()
            .map(|&(idx, status)| {
                let ssrc = ssrc_order[idx];
                warn!(ssrc, %status, "terminating session");
                ssrc
            })
            .collect();

        for ssrc in failed_ssrcs {
            self.sessions.remove(&ssrc);
            self.addr_index.retain(|_, v| *v != ssrc);
            self.n_terminated += 1;
        }

        // end-to-end latency from the mixed frame's capture timestamp
        if frame.capture_ts > 0 {
            let e2e = now_unix_ns() - frame.capture_ts;
            for session in self.sessions.values_mut() {
                session.set_e2e_latency(e2e);
            }
        }
        Ok(())
    }

    /// Metrics snapshot: slot aggregate plus up to `max_conn` connections.
    pub fn query_metrics(
        &self,
        slot_sink: &mut dyn FnMut(&SlotMetrics),
        conn_sink: &mut dyn FnMut(&ConnectionMetrics),
        max_conn: usize,
    ) {
        slot_sink(&SlotMetrics {
            connection_count: self.sessions.len(),
        });

        let mut ssrcs: Vec<u32> = self.sessions.keys().copied().collect();
        ssrcs.sort_unstable();
        for ssrc in ssrcs.into_iter().take(max_conn) {
            conn_sink(&self.sessions[&ssrc].metrics());
        }
    }

    /// Wall-clock based session reaping is handled by the watchdog inside
    /// each session; explicit teardown drops everything at once.
    pub fn close(&mut self) {
        for (_, session) in self.sessions.drain() {
            drop(session);
        }
        self.addr_index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::LatencyTunerProfile;
    use crate::packet::{RtpInfo, FLAG_AUDIO};
    use crate::rtp::Encoding;
    use std::sync::Arc;

    const DUR: u32 = 441;

    fn config() -> ReceiverConfig {
        let mut c = ReceiverConfig::default();
        c.latency.tuner_profile = LatencyTunerProfile::Intact;
        c.resolve().unwrap()
    }

    fn encoding() -> Encoding {
        EncodingMap::new().find(10).unwrap()
    }

    fn media_packet(factory: &PacketFactory, ssrc: u32, seqnum: u16, level: f32) -> PacketPtr {
        let enc = encoding();
        let mut p = factory.new_packet().unwrap();
        let samples = vec![level; DUR as usize * 2];
        let mut payload = Vec::new();
        enc.encode(&samples, &mut payload);
        p.buffer_mut().extend_from_slice(&payload);
        let len = p.buffer().len();
        p.set_rtp(RtpInfo {
            payload_type: 10,
            source_id: ssrc,
            seqnum,
            stream_ts: seqnum as u32 * DUR,
            capture_ts: 0,
            duration: DUR,
            payload: 0..len,
        });
        p.add_flags(FLAG_AUDIO);
        Arc::new(p)
    }

    #[test]
    fn test_session_spawns_per_ssrc() {
        let factory = PacketFactory::new(4096, 512);
        let mut group = ReceiverSessionGroup::new(config(), factory.clone(), None);
        let encodings = EncodingMap::new();

        for sn in 0..4u16 {
            group
                .route_packet(
                    Interface::AudioSource,
                    media_packet(&factory, 111, sn, 0.1),
                    &encodings,
                )
                .unwrap();
            group
                .route_packet(
                    Interface::AudioSource,
                    media_packet(&factory, 222, sn, 0.2),
                    &encodings,
                )
                .unwrap();
        }
        assert_eq!(group.n_sessions(), 2);

        let mut frame = Frame::new();
        group.read_frame(&mut frame, DUR as usize * 2).unwrap();
        // both sessions contribute
        assert!(frame.samples.iter().any(|&s| s > 0.25));
    }

    #[test]
    fn test_unknown_payload_type_ignored() {
        let factory = PacketFactory::new(4096, 64);
        let mut group = ReceiverSessionGroup::new(config(), factory.clone(), None);
        let encodings = EncodingMap::new();

        let mut p = factory.new_packet().unwrap();
        p.set_rtp(RtpInfo {
            payload_type: 77,
            source_id: 5,
            ..Default::default()
        });
        p.add_flags(FLAG_AUDIO);
        group
            .route_packet(Interface::AudioSource, Arc::new(p), &encodings)
            .unwrap();
        assert_eq!(group.n_sessions(), 0);
    }

    #[test]
    fn test_control_updates_mapping() {
        let factory = PacketFactory::new(4096, 256);
        let mut group = ReceiverSessionGroup::new(config(), factory.clone(), None);
        let encodings = EncodingMap::new();

        group
            .route_packet(
                Interface::AudioSource,
                media_packet(&factory, 111, 0, 0.1),
                &encodings,
            )
            .unwrap();

        let sr = rtcp::SenderReport {
            ssrc: 111,
            ntp_ts: rtcp::unix_to_ntp(now_unix_ns()),
            rtp_ts: 0,
            packet_count: 1,
            octet_count: 100,
        };
        let mut buf = Vec::new();
        rtcp::compose_sr(&sr, &mut buf);
        let mut p = factory.new_packet().unwrap();
        p.buffer_mut().extend_from_slice(&buf);
        group
            .route_packet(Interface::AudioControl, Arc::new(p), &encodings)
            .unwrap();
        // mapping accepted without error; metrics still addressable
        let mut slot = SlotMetrics::default();
        let mut conns = Vec::new();
        group.query_metrics(
            &mut |s| slot = *s,
            &mut |c| conns.push(*c),
            8,
        );
        assert_eq!(slot.connection_count, 1);
        assert_eq!(conns.len(), 1);
        assert_eq!(conns[0].source_id, 111);
    }
}
