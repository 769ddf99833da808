use crate::error::CodecError;
use crate::frame;
use crate::profile::CompressionProfile;

/// Compresses whole chunks into self-framed blocks.
///
/// Each implementation:
/// - Produces a block whose header carries its own exact length (see
///   [`frame`]), so a block can be recovered from storage that pads it.
/// - Is deterministic: identical input and profile give identical bytes,
///   whatever thread count the codec runs with internally.
/// - Blocks the caller until the full output buffer is ready.
pub trait BlockCodec: Send + Sync {
    /// Human-readable codec name for CLI display.
    fn name(&self) -> &'static str;

    /// Compress one raw chunk of `itemsize`-byte elements.
    fn compress(
        &self,
        raw: &[u8],
        itemsize: usize,
        profile: &CompressionProfile,
    ) -> Result<Vec<u8>, CodecError>;

    /// Decompress `block` into `dest`, which must be exactly the raw length
    /// the block declares. Returns the number of bytes written.
    fn decompress_into(&self, block: &[u8], dest: &mut [u8]) -> Result<usize, CodecError>;

    /// Decompress `block`, expecting exactly `expected_len` raw bytes.
    fn decompress(&self, block: &[u8], expected_len: usize) -> Result<Vec<u8>, CodecError> {
        let mut out = vec![0u8; expected_len];
        let written = self.decompress_into(block, &mut out)?;
        if written != expected_len {
            return Err(CodecError::Decompression(format!(
                "decompressed {written} bytes, expected {expected_len}"
            )));
        }
        Ok(out)
    }

    /// Length of the block at the start of `buf`, read from its header.
    fn header_declared_length(&self, buf: &[u8]) -> Result<usize, CodecError> {
        frame::header_declared_length(buf)
    }
}
