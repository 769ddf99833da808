use chunkbridge_core::{CodecError, Compressor};

/// A general-purpose compressor applied to one internal block at a time.
///
/// Backends see already-shuffled bytes and know nothing about framing.
/// Each block is compressed independently; no state crosses blocks.
pub trait Backend: Send + Sync {
    fn compressor(&self) -> Compressor;

    /// Compress `src` at `level` (1..=9).
    fn compress(&self, src: &[u8], level: u8) -> Result<Vec<u8>, CodecError>;

    /// Decompress `src` into `dest`, which is exactly the block's raw length.
    fn decompress_into(&self, src: &[u8], dest: &mut [u8]) -> Result<usize, CodecError>;
}
