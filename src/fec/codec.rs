//! Block encoder/decoder abstraction over codec-specific math.
//!
//! A block holds N source symbols and M repair symbols, all of payload size
//! P. The encoder fills repair symbols from a complete set of source
//! symbols; the decoder recovers missing source symbols from any N of the
//! N+M symbols. The Reed-Solomon implementation wraps the
//! `reed-solomon-erasure` crate; LDPC-Staircase is registered in the scheme
//! tables but has no built-in codec.

use reed_solomon_erasure::galois_8::ReedSolomon;
use tracing::warn;

use crate::core::Status;

use super::FecScheme;

/// Codec-side encoder contract consumed by the block writer.
pub trait BlockEncoder: Send {
    /// Open a block of `n_source` + `n_repair` symbols of `payload_size`.
    fn begin_block(
        &mut self,
        n_source: usize,
        n_repair: usize,
        payload_size: usize,
    ) -> Result<(), Status>;

    /// Store source symbol `esi` (0 ≤ esi < n_source).
    fn set_buffer(&mut self, esi: usize, symbol: &[u8]);

    /// Produce the repair symbols from the stored source symbols.
    fn fill_buffers(&mut self) -> Result<(), Status>;

    /// Repair symbol `i` (0 ≤ i < n_repair); valid after `fill_buffers`.
    fn repair_buffer(&self, i: usize) -> &[u8];

    /// Close the block and drop the symbol storage.
    fn end_block(&mut self);
}

/// Codec-side decoder contract consumed by the block reader.
pub trait BlockDecoder: Send {
    /// Open a block of `n_source` + `n_repair` symbols of `payload_size`.
    fn begin_block(
        &mut self,
        n_source: usize,
        n_repair: usize,
        payload_size: usize,
    ) -> Result<(), Status>;

    /// Store a received symbol: source (esi < n_source) or repair.
    fn set_buffer(&mut self, esi: usize, symbol: &[u8]);

    /// Recover missing source symbol `esi`, or `None` when fewer than
    /// n_source symbols are available or reconstruction failed.
    fn repair(&mut self, esi: usize) -> Option<&[u8]>;

    /// Close the block and drop the symbol storage.
    fn end_block(&mut self);
}

/// Reed-Solomon (GF(2^8)) encoder.
pub struct Rs8mEncoder {
    rs: Option<ReedSolomon>,
    shards: Vec<Vec<u8>>,
    n_source: usize,
    n_repair: usize,
    filled: bool,
}

impl Rs8mEncoder {
    pub fn new() -> Self {
        Self {
            rs: None,
            shards: Vec::new(),
            n_source: 0,
            n_repair: 0,
            filled: false,
        }
    }

    fn ensure_codec(&mut self, n: usize, m: usize) -> Result<(), Status> {
        let rebuild = match &self.rs {
            Some(rs) => rs.data_shard_count() != n || rs.parity_shard_count() != m,
            None => true,
        };
        if rebuild {
            self.rs = Some(ReedSolomon::new(n, m).map_err(|_| Status::BadConfig)?);
        }
        Ok(())
    }
}

impl BlockEncoder for Rs8mEncoder {
    fn begin_block(
        &mut self,
        n_source: usize,
        n_repair: usize,
        payload_size: usize,
    ) -> Result<(), Status> {
        if n_source == 0
            || n_repair == 0
            || payload_size == 0
            || (n_source + n_repair) as u32 > FecScheme::Rs8m.max_block_len()
        {
            return Err(Status::BadConfig);
        }
        self.ensure_codec(n_source, n_repair)?;
        self.n_source = n_source;
        self.n_repair = n_repair;
        self.shards = vec![vec![0u8; payload_size]; n_source + n_repair];
        self.filled = false;
        Ok(())
    }

    fn set_buffer(&mut self, esi: usize, symbol: &[u8]) {
        debug_assert!(esi < self.n_source, "rs8m encoder: esi out of source range");
        let shard = &mut self.shards[esi];
        let n = symbol.len().min(shard.len());
        shard[..n].copy_from_slice(&symbol[..n]);
    }

    fn fill_buffers(&mut self) -> Result<(), Status> {
        let rs = self.rs.as_ref().ok_or(Status::BadConfig)?;
        rs.encode(&mut self.shards).map_err(|_| Status::Abort)?;
        self.filled = true;
        Ok(())
    }

    fn repair_buffer(&self, i: usize) -> &[u8] {
        debug_assert!(self.filled, "rs8m encoder: repair read before fill");
        &self.shards[self.n_source + i]
    }

    fn end_block(&mut self) {
        self.shards.clear();
        self.filled = false;
    }
}

/// Reed-Solomon (GF(2^8)) decoder.
pub struct Rs8mDecoder {
    rs: Option<ReedSolomon>,
    shards: Vec<Option<Vec<u8>>>,
    n_source: usize,
    n_present: usize,
    reconstructed: bool,
}

impl Rs8mDecoder {
    pub fn new() -> Self {
        Self {
            rs: None,
            shards: Vec::new(),
            n_source: 0,
            n_present: 0,
            reconstructed: false,
        }
    }
}

impl BlockDecoder for Rs8mDecoder {
    fn begin_block(
        &mut self,
        n_source: usize,
        n_repair: usize,
        payload_size: usize,
    ) -> Result<(), Status> {
        if n_source == 0
            || payload_size == 0
            || (n_source + n_repair) as u32 > FecScheme::Rs8m.max_block_len()
        {
            return Err(Status::BadConfig);
        }
        let rebuild = match &self.rs {
            Some(rs) => {
                rs.data_shard_count() != n_source || rs.parity_shard_count() != n_repair
            }
            None => true,
        };
        if rebuild {
            self.rs = Some(ReedSolomon::new(n_source, n_repair).map_err(|_| Status::BadConfig)?);
        }
        self.n_source = n_source;
        self.shards = vec![None; n_source + n_repair];
        self.n_present = 0;
        self.reconstructed = false;
        Ok(())
    }

    fn set_buffer(&mut self, esi: usize, symbol: &[u8]) {
        if esi >= self.shards.len() {
            return;
        }
        if self.shards[esi].is_none() {
            self.n_present += 1;
        }
        self.shards[esi] = Some(symbol.to_vec());
    }

    fn repair(&mut self, esi: usize) -> Option<&[u8]> {
        if esi >= self.shards.len() {
            return None;
        }
        if !self.reconstructed {
            if self.n_present < self.n_source {
                return None;
            }
            let rs = self.rs.as_ref()?;
            if let Err(err) = rs.reconstruct(&mut self.shards) {
                warn!(%err, "rs8m decoder: reconstruction failed");
                return None;
            }
            self.reconstructed = true;
        }
        self.shards[esi].as_deref()
    }

    fn end_block(&mut self) {
        self.shards.clear();
        self.n_present = 0;
        self.reconstructed = false;
    }
}

/// Registry of available codecs per scheme.
pub struct CodecMap;

impl CodecMap {
    /// Check whether a built-in codec exists for the scheme.
    pub fn supported(scheme: FecScheme) -> bool {
        matches!(scheme, FecScheme::Rs8m)
    }

    pub fn new_encoder(scheme: FecScheme) -> Result<Box<dyn BlockEncoder>, Status> {
        match scheme {
            FecScheme::Rs8m => Ok(Box::new(Rs8mEncoder::new())),
            FecScheme::LdpcStaircase => Err(Status::BadConfig),
        }
    }

    pub fn new_decoder(scheme: FecScheme) -> Result<Box<dyn BlockDecoder>, Status> {
        match scheme {
            FecScheme::Rs8m => Ok(Box::new(Rs8mDecoder::new())),
            FecScheme::LdpcStaircase => Err(Status::BadConfig),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol(i: usize, size: usize) -> Vec<u8> {
        (0..size).map(|j| (i * 31 + j) as u8).collect()
    }

    #[test]
    fn test_encode_then_decode_with_losses() {
        const N: usize = 6;
        const M: usize = 3;
        const P: usize = 32;

        let mut enc = Rs8mEncoder::new();
        enc.begin_block(N, M, P).unwrap();
        for i in 0..N {
            enc.set_buffer(i, &symbol(i, P));
        }
        enc.fill_buffers().unwrap();

        let repair: Vec<Vec<u8>> = (0..M).map(|i| enc.repair_buffer(i).to_vec()).collect();
        enc.end_block();

        // lose source symbols 1, 4 and repair symbol 0
        let mut dec = Rs8mDecoder::new();
        dec.begin_block(N, M, P).unwrap();
        for i in 0..N {
            if i != 1 && i != 4 {
                dec.set_buffer(i, &symbol(i, P));
            }
        }
        for (i, r) in repair.iter().enumerate() {
            if i != 0 {
                dec.set_buffer(N + i, r);
            }
        }

        assert_eq!(dec.repair(1).unwrap(), &symbol(1, P)[..]);
        assert_eq!(dec.repair(4).unwrap(), &symbol(4, P)[..]);
    }

    #[test]
    fn test_too_many_losses() {
        const N: usize = 4;
        const M: usize = 2;
        const P: usize = 16;

        let mut enc = Rs8mEncoder::new();
        enc.begin_block(N, M, P).unwrap();
        for i in 0..N {
            enc.set_buffer(i, &symbol(i, P));
        }
        enc.fill_buffers().unwrap();
        let repair0 = enc.repair_buffer(0).to_vec();

        let mut dec = Rs8mDecoder::new();
        dec.begin_block(N, M, P).unwrap();
        // only 3 symbols of 4 required
        dec.set_buffer(0, &symbol(0, P));
        dec.set_buffer(3, &symbol(3, P));
        dec.set_buffer(N, &repair0);

        assert!(dec.repair(1).is_none());
    }

    #[test]
    fn test_oversized_block_rejected() {
        let mut enc = Rs8mEncoder::new();
        assert_eq!(enc.begin_block(200, 100, 8).err(), Some(Status::BadConfig));
    }

    #[test]
    fn test_codec_map() {
        assert!(CodecMap::supported(FecScheme::Rs8m));
        assert!(!CodecMap::supported(FecScheme::LdpcStaircase));
        assert!(CodecMap::new_encoder(FecScheme::LdpcStaircase).is_err());
    }
}
