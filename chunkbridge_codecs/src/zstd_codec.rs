use chunkbridge_core::{CodecError, Compressor};

use crate::backend::Backend;

/// Zstandard block backend. Levels 1..=9 map straight onto zstd levels.
pub struct ZstdBackend;

impl Backend for ZstdBackend {
    fn compressor(&self) -> Compressor {
        Compressor::Zstd
    }

    fn compress(&self, src: &[u8], level: u8) -> Result<Vec<u8>, CodecError> {
        zstd::bulk::compress(src, level as i32).map_err(|e| CodecError::Compression(format!("zstd: {e}")))
    }

    fn decompress_into(&self, src: &[u8], dest: &mut [u8]) -> Result<usize, CodecError> {
        // The frame carries its content size, but dest is already exact.
        zstd::bulk::decompress_to_buffer(src, dest)
            .map_err(|e| CodecError::Decompression(format!("zstd: {e}")))
    }
}
