use std::sync::Arc;

use chunkbridge_core::frame::BlockHeader;
use chunkbridge_core::profile::FILTER_BLOSC2;
use chunkbridge_core::{BlockCodec, CodecError, Filter, FilterParams};

use crate::framed::FramedCodec;
use crate::shuffle::{shuffle, unshuffle};
use crate::zlib_codec::{zlib_compress, zlib_decompress};

/// Standard deflate filter id.
pub const FILTER_DEFLATE: u16 = 1;
/// Standard byte-shuffle filter id.
pub const FILTER_SHUFFLE: u16 = 2;

const DEFAULT_DEFLATE_LEVEL: u32 = 6;

/// Container filter that stores each chunk as one framed compressed block.
///
/// Its parameter block is [`FilterParams`]: four reserved slots, then level,
/// shuffle flag and compressor code. Decoding needs none of them; every
/// block describes itself.
pub struct BloscFilter {
    codec: Arc<FramedCodec>,
}

impl BloscFilter {
    pub fn new(codec: Arc<FramedCodec>) -> Self {
        Self { codec }
    }
}

impl Default for BloscFilter {
    fn default() -> Self {
        Self::new(Arc::new(FramedCodec::default()))
    }
}

impl Filter for BloscFilter {
    fn id(&self) -> u16 {
        FILTER_BLOSC2
    }

    fn name(&self) -> &'static str {
        "blosc2"
    }

    fn encode(
        &self,
        data: &[u8],
        cd_values: &[u32],
        element_size: usize,
    ) -> Result<Vec<u8>, CodecError> {
        let profile = FilterParams::from_cd_values(cd_values)?.profile();
        self.codec.compress(data, element_size, &profile)
    }

    fn decode(
        &self,
        data: &[u8],
        _cd_values: &[u32],
        _element_size: usize,
        size_hint: usize,
    ) -> Result<Vec<u8>, CodecError> {
        let len = self.codec.header_declared_length(data)?;
        let nbytes = BlockHeader::from_bytes(data)?.nbytes();
        if nbytes != size_hint {
            return Err(CodecError::Decompression(format!(
                "block holds {nbytes} bytes, chunk has {size_hint}"
            )));
        }
        self.codec.decompress(&data[..len], nbytes)
    }
}

/// Byte shuffle as a standalone pipeline stage.
pub struct ShuffleFilter;

impl Filter for ShuffleFilter {
    fn id(&self) -> u16 {
        FILTER_SHUFFLE
    }

    fn name(&self) -> &'static str {
        "shuffle"
    }

    fn encode(&self, data: &[u8], _: &[u32], element_size: usize) -> Result<Vec<u8>, CodecError> {
        let mut out = vec![0u8; data.len()];
        shuffle(element_size, data, &mut out);
        Ok(out)
    }

    fn decode(
        &self,
        data: &[u8],
        _: &[u32],
        element_size: usize,
        _size_hint: usize,
    ) -> Result<Vec<u8>, CodecError> {
        let mut out = vec![0u8; data.len()];
        unshuffle(element_size, data, &mut out);
        Ok(out)
    }
}

/// zlib-framed deflate. `cd_values[0]` is the level, 6 when absent.
pub struct DeflateFilter;

impl Filter for DeflateFilter {
    fn id(&self) -> u16 {
        FILTER_DEFLATE
    }

    fn name(&self) -> &'static str {
        "deflate"
    }

    fn encode(&self, data: &[u8], cd_values: &[u32], _: usize) -> Result<Vec<u8>, CodecError> {
        let level = cd_values.first().copied().unwrap_or(DEFAULT_DEFLATE_LEVEL);
        if level > 9 {
            return Err(CodecError::InvalidParams(format!("deflate level {level} exceeds 9")));
        }
        zlib_compress(data, level)
    }

    fn decode(&self, data: &[u8], _: &[u32], _: usize, size_hint: usize) -> Result<Vec<u8>, CodecError> {
        zlib_decompress(data, size_hint)
    }
}
