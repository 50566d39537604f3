//! Minimal RTCP support: sender reports (RFC 3550 §6.4.1).
//!
//! The sender emits periodic SR packets carrying the mapping between its
//! capture clock (as an NTP timestamp) and the RTP stream timestamp; the
//! receiver feeds that mapping into the timestamp injector and derives
//! end-to-end latency from it.

use crate::core::time::Nanos;

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

const SR_PACKET_TYPE: u8 = 200;
const SR_LENGTH_WORDS: u16 = 6; // header + ssrc + sender info, no report blocks
const SR_SIZE: usize = 28;

/// Sender report payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderReport {
    pub ssrc: u32,
    /// 64-bit NTP timestamp of the report.
    pub ntp_ts: u64,
    /// RTP stream timestamp corresponding to `ntp_ts`.
    pub rtp_ts: u32,
    pub packet_count: u32,
    pub octet_count: u32,
}

/// Convert Unix nanoseconds to a 64-bit NTP timestamp.
pub fn unix_to_ntp(unix_ns: Nanos) -> u64 {
    if unix_ns <= 0 {
        return 0;
    }
    let secs = unix_ns as u64 / 1_000_000_000;
    let frac_ns = unix_ns as u64 % 1_000_000_000;
    let frac = (frac_ns << 32) / 1_000_000_000;
    ((secs + NTP_UNIX_OFFSET) << 32) | frac
}

/// Convert a 64-bit NTP timestamp to Unix nanoseconds.
pub fn ntp_to_unix(ntp: u64) -> Nanos {
    let secs = (ntp >> 32).saturating_sub(NTP_UNIX_OFFSET);
    let frac = ntp & 0xFFFF_FFFF;
    let frac_ns = (frac * 1_000_000_000) >> 32;
    (secs * 1_000_000_000 + frac_ns) as Nanos
}

/// Serialize a sender report into `out`.
pub fn compose_sr(sr: &SenderReport, out: &mut Vec<u8>) {
    out.clear();
    out.reserve(SR_SIZE);
    out.push(0x80); // V=2, P=0, RC=0
    out.push(SR_PACKET_TYPE);
    out.extend_from_slice(&SR_LENGTH_WORDS.to_be_bytes());
    out.extend_from_slice(&sr.ssrc.to_be_bytes());
    out.extend_from_slice(&sr.ntp_ts.to_be_bytes());
    out.extend_from_slice(&sr.rtp_ts.to_be_bytes());
    out.extend_from_slice(&sr.packet_count.to_be_bytes());
    out.extend_from_slice(&sr.octet_count.to_be_bytes());
}

/// Parse a sender report; ignores trailing report blocks.
pub fn parse_sr(data: &[u8]) -> Option<SenderReport> {
    if data.len() < SR_SIZE {
        return None;
    }
    if (data[0] >> 6) & 0x03 != 2 {
        return None;
    }
    if data[1] != SR_PACKET_TYPE {
        return None;
    }
    Some(SenderReport {
        ssrc: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
        ntp_ts: u64::from_be_bytes([
            data[8], data[9], data[10], data[11], data[12], data[13], data[14], data[15],
        ]),
        rtp_ts: u32::from_be_bytes([data[16], data[17], data[18], data[19]]),
        packet_count: u32::from_be_bytes([data[20], data[21], data[22], data[23]]),
        octet_count: u32::from_be_bytes([data[24], data[25], data[26], data[27]]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sr_roundtrip() {
        let sr = SenderReport {
            ssrc: 0xCAFE_BABE,
            ntp_ts: unix_to_ntp(1_700_000_000_000_000_000),
            rtp_ts: 123_456,
            packet_count: 42,
            octet_count: 42 * 160,
        };
        let mut buf = Vec::new();
        compose_sr(&sr, &mut buf);
        assert_eq!(buf.len(), SR_SIZE);
        assert_eq!(parse_sr(&buf), Some(sr));
    }

    #[test]
    fn test_ntp_conversion_roundtrip() {
        let unix_ns = 1_700_000_123_456_789_000i64;
        let ntp = unix_to_ntp(unix_ns);
        let back = ntp_to_unix(ntp);
        // fraction has 32-bit resolution, well under a microsecond
        assert!((back - unix_ns).abs() < 1_000);
    }

    #[test]
    fn test_parse_rejects_non_sr() {
        let mut buf = Vec::new();
        compose_sr(
            &SenderReport {
                ssrc: 1,
                ntp_ts: 0,
                rtp_ts: 0,
                packet_count: 0,
                octet_count: 0,
            },
            &mut buf,
        );
        buf[1] = 201; // RR
        assert!(parse_sr(&buf).is_none());
        assert!(parse_sr(&buf[..20]).is_none());
    }
}
