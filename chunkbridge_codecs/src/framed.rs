use chunkbridge_core::frame::{
    header_declared_length, BlockHeader, BSTART_LEN, FLAG_MEMCPYED, FLAG_SHUFFLE, HEADER_LEN,
    MAX_BUFFERSIZE, MAX_TYPESIZE, MIN_BLOCKSIZE,
};
use chunkbridge_core::{BlockCodec, CodecError, CompressionProfile, Compressor};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::trace;

use crate::backend::Backend;
use crate::backend_for;
use crate::shuffle::{shuffle, unshuffle};

/// The framed block codec.
///
/// A chunk is split into `blocksize` blocks, each optionally byte-shuffled
/// and compressed independently by the profile's backend, behind a 16-byte
/// header that records the block's own total length. Blocks that do not
/// shrink are stored raw; a chunk that does not shrink as a whole is stored
/// verbatim ("memcpyed").
///
/// With more than one thread, blocks are processed on a private rayon pool.
/// Output bytes do not depend on the thread count.
pub struct FramedCodec {
    pool: Option<ThreadPool>,
    nthreads: usize,
}

impl Default for FramedCodec {
    fn default() -> Self {
        Self {
            pool: None,
            nthreads: 1,
        }
    }
}

impl std::fmt::Debug for FramedCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedCodec").field("nthreads", &self.nthreads).finish()
    }
}

impl FramedCodec {
    /// A codec that uses `nthreads` workers per call.
    pub fn new(nthreads: usize) -> Result<Self, CodecError> {
        if nthreads == 0 {
            return Err(CodecError::InvalidParams("nthreads must be at least 1".into()));
        }
        if nthreads == 1 {
            return Ok(Self::default());
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(nthreads)
            .thread_name(|i| format!("chunkbridge-codec-{i}"))
            .build()
            .map_err(|e| CodecError::InvalidParams(format!("cannot start codec threads: {e}")))?;
        Ok(Self {
            pool: Some(pool),
            nthreads,
        })
    }

    /// A codec sized by the profile's `nthreads`.
    pub fn for_profile(profile: &CompressionProfile) -> Result<Self, CodecError> {
        profile.validate()?;
        Self::new(profile.nthreads)
    }

    pub fn nthreads(&self) -> usize {
        self.nthreads
    }

    fn encode_block(
        backend: &dyn Backend,
        block: &[u8],
        typesize: usize,
        shuffled: bool,
        level: u8,
    ) -> Result<Vec<u8>, CodecError> {
        let shuffled_buf;
        let input = if shuffled {
            let mut buf = vec![0u8; block.len()];
            shuffle(typesize, block, &mut buf);
            shuffled_buf = buf;
            &shuffled_buf[..]
        } else {
            block
        };
        let compressed = backend.compress(input, level)?;
        let payload = if compressed.len() < input.len() {
            &compressed[..]
        } else {
            input
        };
        let mut out = Vec::with_capacity(BSTART_LEN + payload.len());
        out.extend_from_slice(&(payload.len() as i32).to_le_bytes());
        out.extend_from_slice(payload);
        Ok(out)
    }

    fn decode_block(
        backend: &dyn Backend,
        payload: &[u8],
        typesize: usize,
        shuffled: bool,
        out: &mut [u8],
    ) -> Result<(), CodecError> {
        if shuffled {
            let mut tmp = vec![0u8; out.len()];
            Self::inflate_block(backend, payload, &mut tmp)?;
            unshuffle(typesize, &tmp, out);
            Ok(())
        } else {
            Self::inflate_block(backend, payload, out)
        }
    }

    /// A payload as long as the raw block was stored uncompressed.
    fn inflate_block(backend: &dyn Backend, payload: &[u8], out: &mut [u8]) -> Result<(), CodecError> {
        let raw_len = out.len();
        if payload.len() == raw_len {
            out.copy_from_slice(payload);
            return Ok(());
        }
        let n = backend.decompress_into(payload, out)?;
        if n != raw_len {
            return Err(CodecError::Decompression(format!(
                "block decompressed to {n} bytes, expected {raw_len}"
            )));
        }
        Ok(())
    }
}

/// Automatic internal block size: larger blocks for higher levels.
fn auto_blocksize(level: u8) -> usize {
    match level {
        0..=3 => 32 * 1024,
        4..=6 => 64 * 1024,
        _ => 128 * 1024,
    }
}

fn effective_blocksize(profile: &CompressionProfile, typesize: usize, nbytes: usize) -> usize {
    let mut blocksize = match profile.blocksize {
        0 => auto_blocksize(profile.level),
        n => n,
    };
    blocksize = blocksize.max(MIN_BLOCKSIZE).min(nbytes.max(1));
    if blocksize > typesize {
        blocksize -= blocksize % typesize;
    }
    blocksize
}

impl BlockCodec for FramedCodec {
    fn name(&self) -> &'static str {
        "framed"
    }

    fn compress(
        &self,
        raw: &[u8],
        itemsize: usize,
        profile: &CompressionProfile,
    ) -> Result<Vec<u8>, CodecError> {
        profile.validate()?;
        let nbytes = raw.len();
        let nblocks_max = nbytes.div_ceil(MIN_BLOCKSIZE);
        if nbytes > MAX_BUFFERSIZE.saturating_sub(2 * BSTART_LEN * nblocks_max) {
            return Err(CodecError::Compression(format!(
                "{nbytes} bytes exceed the largest compressible buffer"
            )));
        }
        let typesize = if itemsize == 0 || itemsize > MAX_TYPESIZE {
            1
        } else {
            itemsize
        };
        let shuffled = profile.shuffle && typesize > 1;
        let compcode = profile.compressor.code();
        let blocksize = effective_blocksize(profile, typesize, nbytes);

        if profile.level > 0 && nbytes > 0 {
            let backend = backend_for(profile.compressor);
            let blocks: Vec<&[u8]> = raw.chunks(blocksize).collect();
            let level = profile.level;
            let encode = |block: &&[u8]| Self::encode_block(backend, block, typesize, shuffled, level);
            let encoded: Vec<Vec<u8>> = match &self.pool {
                Some(pool) => pool.install(|| blocks.par_iter().map(encode).collect::<Result<_, _>>())?,
                None => blocks.iter().map(encode).collect::<Result<_, _>>()?,
            };

            let table_len = encoded.len() * BSTART_LEN;
            let total = HEADER_LEN + table_len + encoded.iter().map(Vec::len).sum::<usize>();
            if total < HEADER_LEN + nbytes {
                let flags = if shuffled { FLAG_SHUFFLE } else { 0 };
                let mut header = BlockHeader::new(flags, compcode, typesize as u8, nbytes, blocksize);
                header.cbytes = total as i32;
                let mut out = Vec::with_capacity(total);
                out.extend_from_slice(&header.to_bytes());
                let mut start = HEADER_LEN + table_len;
                for block in &encoded {
                    out.extend_from_slice(&(start as i32).to_le_bytes());
                    start += block.len();
                }
                for block in &encoded {
                    out.extend_from_slice(block);
                }
                trace!(nbytes, cbytes = total, nblocks = encoded.len(), "compressed chunk");
                return Ok(out);
            }
        }

        // Stored verbatim.
        let mut header = BlockHeader::new(FLAG_MEMCPYED, compcode, typesize as u8, nbytes, blocksize);
        header.cbytes = (HEADER_LEN + nbytes) as i32;
        let mut out = Vec::with_capacity(HEADER_LEN + nbytes);
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(raw);
        trace!(nbytes, "stored chunk verbatim");
        Ok(out)
    }

    fn decompress_into(&self, block: &[u8], dest: &mut [u8]) -> Result<usize, CodecError> {
        let cbytes = header_declared_length(block)?;
        let header = BlockHeader::from_bytes(block)?;
        let block = &block[..cbytes];
        let nbytes = header.nbytes();
        if dest.len() != nbytes {
            return Err(CodecError::Decompression(format!(
                "block holds {nbytes} bytes, destination has {}",
                dest.len()
            )));
        }
        if nbytes == 0 {
            return Ok(0);
        }
        if header.is_memcpyed() {
            dest.copy_from_slice(&block[HEADER_LEN..HEADER_LEN + nbytes]);
            return Ok(nbytes);
        }

        let backend = backend_for(Compressor::from_code(header.compressor_code())?);
        let typesize = header.typesize as usize;
        let shuffled = header.is_shuffled();
        let blocksize = header.blocksize();
        let nblocks = header.nblocks();

        // Resolve every block's payload before touching the destination.
        let table_end = HEADER_LEN + nblocks * BSTART_LEN;
        let payloads = (0..nblocks)
            .map(|i| {
                let start = read_len(block, HEADER_LEN + i * BSTART_LEN)?;
                let csize = read_len(block, start)?;
                let begin = start + BSTART_LEN;
                if start < table_end || begin + csize > cbytes {
                    return Err(CodecError::Decompression(format!(
                        "block {i} at {start} with {csize} bytes overruns {cbytes}-byte buffer"
                    )));
                }
                Ok(&block[begin..begin + csize])
            })
            .collect::<Result<Vec<_>, _>>()?;

        let jobs: Vec<(&[u8], &mut [u8])> = payloads.into_iter().zip(dest.chunks_mut(blocksize)).collect();
        let decode = |(payload, out): (&[u8], &mut [u8])| {
            Self::decode_block(backend, payload, typesize, shuffled, out)
        };
        match &self.pool {
            Some(pool) => pool.install(|| jobs.into_par_iter().try_for_each(decode))?,
            None => jobs.into_iter().try_for_each(decode)?,
        }
        Ok(nbytes)
    }
}

/// Read a non-negative i32 length/offset at `pos`.
fn read_len(buf: &[u8], pos: usize) -> Result<usize, CodecError> {
    let bytes = buf
        .get(pos..pos + BSTART_LEN)
        .ok_or_else(|| CodecError::Decompression(format!("offset {pos} beyond block end")))?;
    let value = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    usize::try_from(value).map_err(|_| CodecError::Decompression(format!("negative length {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> Vec<u8> {
        (0..n as i32).flat_map(|v| v.to_le_bytes()).collect()
    }

    fn noise(n: usize) -> Vec<u8> {
        let mut state = 0x2545_f491u32;
        (0..n)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect()
    }

    #[test]
    fn round_trip_every_compressor() {
        let raw = ramp(10_000);
        let codec = FramedCodec::default();
        for compressor in Compressor::ALL {
            let profile = CompressionProfile::default().compressor(compressor).blocksize(4096);
            let block = codec.compress(&raw, 4, &profile).unwrap();
            assert!(block.len() < raw.len(), "{compressor} did not compress a ramp");
            assert_eq!(codec.decompress(&block, raw.len()).unwrap(), raw);
        }
    }

    #[test]
    fn header_length_matches_block_and_survives_padding() {
        let raw = ramp(1000);
        let codec = FramedCodec::default();
        let mut block = codec.compress(&raw, 4, &CompressionProfile::default()).unwrap();
        let real = block.len();
        assert_eq!(codec.header_declared_length(&block).unwrap(), real);
        block.resize(real + 100, 0xaa);
        let declared = codec.header_declared_length(&block).unwrap();
        assert_eq!(declared, real);
        assert_eq!(codec.decompress(&block[..declared], raw.len()).unwrap(), raw);
    }

    #[test]
    fn incompressible_data_is_stored_verbatim() {
        let raw = noise(3000);
        let codec = FramedCodec::default();
        let block = codec.compress(&raw, 1, &CompressionProfile::default()).unwrap();
        let header = BlockHeader::from_bytes(&block).unwrap();
        assert!(header.is_memcpyed());
        assert_eq!(block.len(), HEADER_LEN + raw.len());
        assert_eq!(codec.decompress(&block, raw.len()).unwrap(), raw);
    }

    #[test]
    fn level_zero_and_empty_input() {
        let codec = FramedCodec::default();
        let raw = ramp(64);
        let block = codec.compress(&raw, 4, &CompressionProfile::default().level(0)).unwrap();
        assert!(BlockHeader::from_bytes(&block).unwrap().is_memcpyed());
        assert_eq!(codec.decompress(&block, raw.len()).unwrap(), raw);

        let empty = codec.compress(&[], 4, &CompressionProfile::default()).unwrap();
        assert_eq!(empty.len(), HEADER_LEN);
        assert!(codec.decompress(&empty, 0).unwrap().is_empty());
    }

    #[test]
    fn wide_items_are_not_shuffled() {
        let raw = ramp(2048);
        let codec = FramedCodec::default();
        let block = codec.compress(&raw, 300, &CompressionProfile::default()).unwrap();
        let header = BlockHeader::from_bytes(&block).unwrap();
        assert_eq!(header.typesize, 1);
        assert!(!header.is_shuffled());
        assert_eq!(codec.decompress(&block, raw.len()).unwrap(), raw);
    }

    #[test]
    fn output_is_independent_of_thread_count() {
        let mut raw = ramp(50_000);
        raw.extend(noise(7)); // partial trailing element and block
        let profile = CompressionProfile::default().compressor(Compressor::Zstd).blocksize(8192);
        let single = FramedCodec::default().compress(&raw, 4, &profile).unwrap();
        let pooled = FramedCodec::new(4).unwrap();
        let multi = pooled.compress(&raw, 4, &profile).unwrap();
        assert_eq!(single, multi);
        assert_eq!(pooled.decompress(&multi, raw.len()).unwrap(), raw);
    }

    #[test]
    fn wrong_destination_length_fails() {
        let raw = ramp(512);
        let codec = FramedCodec::default();
        let block = codec.compress(&raw, 4, &CompressionProfile::default()).unwrap();
        assert!(matches!(
            codec.decompress(&block, raw.len() - 4),
            Err(CodecError::Decompression(_))
        ));
    }

    #[test]
    fn corrupt_block_table_is_an_error_not_a_panic() {
        let raw = ramp(4096);
        let codec = FramedCodec::default();
        let mut block = codec.compress(&raw, 4, &CompressionProfile::default().blocksize(1024)).unwrap();
        assert!(!BlockHeader::from_bytes(&block).unwrap().is_memcpyed());
        block[HEADER_LEN..HEADER_LEN + 4].copy_from_slice(&i32::MAX.to_le_bytes());
        assert!(codec.decompress(&block, raw.len()).is_err());
    }

    #[test]
    fn rejects_zero_threads() {
        assert!(FramedCodec::new(0).is_err());
        assert_eq!(FramedCodec::new(3).unwrap().nthreads(), 3);
    }

    #[test]
    fn thread_count_comes_from_the_profile() {
        let profile = CompressionProfile::default().nthreads(3);
        assert_eq!(FramedCodec::for_profile(&profile).unwrap().nthreads(), 3);
        assert_eq!(
            FramedCodec::for_profile(&CompressionProfile::default()).unwrap().nthreads(),
            1
        );
        assert!(FramedCodec::for_profile(&CompressionProfile::default().nthreads(0)).is_err());
    }
}
