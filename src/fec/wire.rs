//! FEC wire formats.
//!
//! Source packets carry a footer appended after the audio payload; repair
//! packets carry a header before the repair symbol. All integers are network
//! byte order.
//!
//! ```text
//! rs8m source footer:  [ SBN:16 | ESI:16 | SBL:16 ]
//! rs8m repair header:  [ SBN:16 | ESI:16 | SBL:16 | NES:16 ]
//! ldpc source footer:  [ SBN:32 | ESI:32 | SBL:32 ]
//! ldpc repair header:  [ SBN:32 | ESI:32 | SBL:32 | NES:32 ]
//! ```

use super::FecScheme;

/// Size in bytes of the source packet footer for the scheme.
pub fn source_footer_len(scheme: FecScheme) -> usize {
    match scheme {
        FecScheme::Rs8m => 6,
        FecScheme::LdpcStaircase => 12,
    }
}

/// Size in bytes of the repair packet header for the scheme.
pub fn repair_header_len(scheme: FecScheme) -> usize {
    match scheme {
        FecScheme::Rs8m => 8,
        FecScheme::LdpcStaircase => 16,
    }
}

/// Parsed block fields of a source footer or repair header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockFields {
    pub sbn: u32,
    pub esi: u32,
    pub sbl: u32,
    /// Total encoding symbols; 0 for source packets (not on the wire).
    pub nes: u32,
}

/// Encode a source footer into `out`, which must be exactly
/// `source_footer_len` bytes.
pub fn compose_source_footer(scheme: FecScheme, fields: &BlockFields, out: &mut [u8]) {
    match scheme {
        FecScheme::Rs8m => {
            out[0..2].copy_from_slice(&(fields.sbn as u16).to_be_bytes());
            out[2..4].copy_from_slice(&(fields.esi as u16).to_be_bytes());
            out[4..6].copy_from_slice(&(fields.sbl as u16).to_be_bytes());
        }
        FecScheme::LdpcStaircase => {
            out[0..4].copy_from_slice(&fields.sbn.to_be_bytes());
            out[4..8].copy_from_slice(&fields.esi.to_be_bytes());
            out[8..12].copy_from_slice(&fields.sbl.to_be_bytes());
        }
    }
}

/// Decode a source footer from the trailing bytes of a packet.
pub fn parse_source_footer(scheme: FecScheme, data: &[u8]) -> Option<BlockFields> {
    let flen = source_footer_len(scheme);
    if data.len() < flen {
        return None;
    }
    let f = &data[data.len() - flen..];
    Some(match scheme {
        FecScheme::Rs8m => BlockFields {
            sbn: u16::from_be_bytes([f[0], f[1]]) as u32,
            esi: u16::from_be_bytes([f[2], f[3]]) as u32,
            sbl: u16::from_be_bytes([f[4], f[5]]) as u32,
            nes: 0,
        },
        FecScheme::LdpcStaircase => BlockFields {
            sbn: u32::from_be_bytes([f[0], f[1], f[2], f[3]]),
            esi: u32::from_be_bytes([f[4], f[5], f[6], f[7]]),
            sbl: u32::from_be_bytes([f[8], f[9], f[10], f[11]]),
            nes: 0,
        },
    })
}

/// Encode a repair header into `out`, which must be exactly
/// `repair_header_len` bytes.
pub fn compose_repair_header(scheme: FecScheme, fields: &BlockFields, out: &mut [u8]) {
    match scheme {
        FecScheme::Rs8m => {
            out[0..2].copy_from_slice(&(fields.sbn as u16).to_be_bytes());
            out[2..4].copy_from_slice(&(fields.esi as u16).to_be_bytes());
            out[4..6].copy_from_slice(&(fields.sbl as u16).to_be_bytes());
            out[6..8].copy_from_slice(&(fields.nes as u16).to_be_bytes());
        }
        FecScheme::LdpcStaircase => {
            out[0..4].copy_from_slice(&fields.sbn.to_be_bytes());
            out[4..8].copy_from_slice(&fields.esi.to_be_bytes());
            out[8..12].copy_from_slice(&fields.sbl.to_be_bytes());
            out[12..16].copy_from_slice(&fields.nes.to_be_bytes());
        }
    }
}

/// Decode a repair header from the leading bytes of a packet.
pub fn parse_repair_header(scheme: FecScheme, data: &[u8]) -> Option<BlockFields> {
    let hlen = repair_header_len(scheme);
    if data.len() < hlen {
        return None;
    }
    Some(match scheme {
        FecScheme::Rs8m => BlockFields {
            sbn: u16::from_be_bytes([data[0], data[1]]) as u32,
            esi: u16::from_be_bytes([data[2], data[3]]) as u32,
            sbl: u16::from_be_bytes([data[4], data[5]]) as u32,
            nes: u16::from_be_bytes([data[6], data[7]]) as u32,
        },
        FecScheme::LdpcStaircase => BlockFields {
            sbn: u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
            esi: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            sbl: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            nes: u32::from_be_bytes([data[12], data[13], data[14], data[15]]),
        },
    })
}
