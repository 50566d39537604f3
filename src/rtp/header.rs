//! RTP header parsing and building (RFC 3550).

use crate::fec::{wire, FecScheme};
use crate::packet::{Packet, RtpInfo, FLAG_AUDIO, FLAG_COMPOSED, FLAG_RTP};

/// Fixed RTP header size (no CSRC list on our streams).
pub const HEADER_SIZE: usize = 12;

const VERSION: u8 = 2;

/// Parse the packet buffer as an RTP datagram and attach the RTP view.
///
/// When `fec_scheme` is set, the trailing FEC footer is parsed and attached
/// too, and the payload range excludes it. Returns `None` for malformed
/// datagrams.
pub fn parse_packet(packet: &mut Packet, fec_scheme: Option<FecScheme>) -> Option<()> {
    let data = packet.buffer();
    if data.len() < HEADER_SIZE {
        return None;
    }

    let byte0 = data[0];
    if (byte0 >> 6) & 0x03 != VERSION {
        return None;
    }
    let padding = (byte0 & 0x20) != 0;
    let extension = (byte0 & 0x10) != 0;
    let csrc_count = (byte0 & 0x0F) as usize;

    let payload_type = data[1] & 0x7F;
    let seqnum = u16::from_be_bytes([data[2], data[3]]);
    let stream_ts = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    let source_id = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

    let mut offset = HEADER_SIZE + csrc_count * 4;
    if extension {
        if data.len() < offset + 4 {
            return None;
        }
        let ext_words = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
        offset += 4 + ext_words * 4;
    }
    if offset > data.len() {
        return None;
    }

    let mut payload_end = data.len();
    if padding {
        let pad = data[data.len() - 1] as usize;
        if pad == 0 || pad > data.len() - offset {
            return None;
        }
        payload_end -= pad;
    }

    let fec = match fec_scheme {
        Some(scheme) => {
            let flen = wire::source_footer_len(scheme);
            if payload_end - offset < flen {
                return None;
            }
            let fields = wire::parse_source_footer(scheme, &data[..payload_end])?;
            payload_end -= flen;
            Some((scheme, fields, payload_end..payload_end + flen))
        }
        None => None,
    };

    packet.set_rtp(RtpInfo {
        payload_type,
        source_id,
        seqnum,
        stream_ts,
        capture_ts: 0,
        duration: 0,
        payload: offset..payload_end,
    });
    packet.add_flags(FLAG_RTP | FLAG_AUDIO);

    if let Some((scheme, fields, _)) = fec {
        packet.set_fec(crate::packet::FecInfo {
            scheme,
            sbn: fields.sbn,
            esi: fields.esi,
            sbl: fields.sbl,
            nes: fields.nes,
            payload: offset..payload_end,
        });
    }

    Some(())
}

/// Write the RTP header into the first 12 bytes of the packet buffer and
/// mark the packet composed. The buffer must already hold the payload (and
/// FEC footer, when present) after the reserved header prefix.
pub fn compose_header(packet: &mut Packet) {
    let rtp = match packet.rtp() {
        Some(rtp) => rtp.clone(),
        None => return,
    };
    let buf = packet.buffer_mut();
    debug_assert!(buf.len() >= HEADER_SIZE);

    buf[0] = VERSION << 6;
    buf[1] = rtp.payload_type & 0x7F;
    buf[2..4].copy_from_slice(&rtp.seqnum.to_be_bytes());
    buf[4..8].copy_from_slice(&rtp.stream_ts.to_be_bytes());
    buf[8..12].copy_from_slice(&rtp.source_id.to_be_bytes());

    packet.add_flags(FLAG_COMPOSED);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketFactory;

    #[test]
    fn test_compose_parse_roundtrip() {
        let factory = PacketFactory::new(256, 4);
        let mut p = factory.new_packet().unwrap();
        p.buffer_mut().resize(HEADER_SIZE + 8, 0);
        p.buffer_mut()[HEADER_SIZE..].copy_from_slice(&[9u8; 8]);
        p.set_rtp(RtpInfo {
            payload_type: 10,
            source_id: 0xDEAD_BEEF,
            seqnum: 4321,
            stream_ts: 123_456,
            capture_ts: 0,
            duration: 0,
            payload: HEADER_SIZE..HEADER_SIZE + 8,
        });
        compose_header(&mut p);
        assert!(p.has_flags(FLAG_COMPOSED));

        let mut q = factory.new_packet().unwrap();
        q.buffer_mut().extend_from_slice(p.buffer());
        parse_packet(&mut q, None).unwrap();

        let rtp = q.rtp().unwrap();
        assert_eq!(rtp.payload_type, 10);
        assert_eq!(rtp.source_id, 0xDEAD_BEEF);
        assert_eq!(rtp.seqnum, 4321);
        assert_eq!(rtp.stream_ts, 123_456);
        assert_eq!(q.payload(), &[9u8; 8]);
    }

    #[test]
    fn test_parse_with_fec_footer() {
        let factory = PacketFactory::new(256, 4);
        let mut p = factory.new_packet().unwrap();
        p.buffer_mut().resize(HEADER_SIZE + 8 + 6, 0);
        p.set_rtp(RtpInfo {
            payload_type: 11,
            seqnum: 7,
            payload: HEADER_SIZE..HEADER_SIZE + 8,
            ..Default::default()
        });
        compose_header(&mut p);
        let fields = wire::BlockFields {
            sbn: 3,
            esi: 1,
            sbl: 18,
            nes: 0,
        };
        let end = p.buffer().len();
        wire::compose_source_footer(FecScheme::Rs8m, &fields, &mut p.buffer_mut()[end - 6..]);

        let mut q = factory.new_packet().unwrap();
        q.buffer_mut().extend_from_slice(p.buffer());
        parse_packet(&mut q, Some(FecScheme::Rs8m)).unwrap();

        assert_eq!(q.payload().len(), 8);
        let fec = q.fec().unwrap();
        assert_eq!(fec.sbn, 3);
        assert_eq!(fec.esi, 1);
        assert_eq!(fec.sbl, 18);
    }

    #[test]
    fn test_rejects_bad_version() {
        let factory = PacketFactory::new(64, 2);
        let mut p = factory.new_packet().unwrap();
        p.buffer_mut().resize(HEADER_SIZE, 0);
        p.buffer_mut()[0] = 0x40; // version 1
        assert!(parse_packet(&mut p, None).is_none());
    }

    #[test]
    fn test_rejects_truncated() {
        let factory = PacketFactory::new(64, 2);
        let mut p = factory.new_packet().unwrap();
        p.buffer_mut().resize(6, 0);
        assert!(parse_packet(&mut p, None).is_none());
    }
}
