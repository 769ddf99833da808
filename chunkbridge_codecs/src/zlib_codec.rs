use std::io::{Read, Write};

use chunkbridge_core::{CodecError, Compressor};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::backend::Backend;

/// zlib (deflate with zlib framing) block backend.
pub struct ZlibBackend;

impl Backend for ZlibBackend {
    fn compressor(&self) -> Compressor {
        Compressor::Zlib
    }

    fn compress(&self, src: &[u8], level: u8) -> Result<Vec<u8>, CodecError> {
        zlib_compress(src, level as u32)
    }

    fn decompress_into(&self, src: &[u8], dest: &mut [u8]) -> Result<usize, CodecError> {
        let mut decoder = ZlibDecoder::new(src);
        decoder
            .read_exact(dest)
            .map_err(|e| CodecError::Decompression(format!("zlib: {e}")))?;
        let mut probe = [0u8; 1];
        match decoder.read(&mut probe) {
            Ok(0) => Ok(dest.len()),
            Ok(_) => Err(CodecError::Decompression(format!(
                "zlib: stream holds more than {} bytes",
                dest.len()
            ))),
            Err(e) => Err(CodecError::Decompression(format!("zlib: {e}"))),
        }
    }
}

pub(crate) fn zlib_compress(src: &[u8], level: u32) -> Result<Vec<u8>, CodecError> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(src.len() / 2), Compression::new(level));
    encoder
        .write_all(src)
        .and_then(|_| encoder.finish())
        .map_err(|e| CodecError::Compression(format!("zlib: {e}")))
}

pub(crate) fn zlib_decompress(src: &[u8], size_hint: usize) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(size_hint);
    ZlibDecoder::new(src)
        .read_to_end(&mut out)
        .map_err(|e| CodecError::Decompression(format!("zlib: {e}")))?;
    Ok(out)
}
