use chunkbridge_core::{CodecError, Compressor};
use lz4_flex::block::{compress, decompress_into};

use crate::backend::Backend;

/// LZ4 block backend.
///
/// Fastest decompression of the bundled backends. LZ4 has no levels; the
/// level only decides whether the framed codec compresses at all.
pub struct Lz4Backend;

impl Backend for Lz4Backend {
    fn compressor(&self) -> Compressor {
        Compressor::Lz4
    }

    fn compress(&self, src: &[u8], _level: u8) -> Result<Vec<u8>, CodecError> {
        Ok(compress(src))
    }

    fn decompress_into(&self, src: &[u8], dest: &mut [u8]) -> Result<usize, CodecError> {
        decompress_into(src, dest).map_err(|e| CodecError::Decompression(format!("lz4: {e}")))
    }
}
