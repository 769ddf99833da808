mod backend;
mod filters;
mod framed;
mod lz4_codec;
pub mod shuffle;
mod zlib_codec;
mod zstd_codec;

pub use backend::Backend;
pub use filters::{BloscFilter, DeflateFilter, ShuffleFilter, FILTER_DEFLATE, FILTER_SHUFFLE};
pub use framed::FramedCodec;
pub use lz4_codec::Lz4Backend;
pub use zlib_codec::ZlibBackend;
pub use zstd_codec::ZstdBackend;

use std::sync::Arc;

use chunkbridge_core::{Compressor, FilterRegistry};

static LZ4: Lz4Backend = Lz4Backend;
static ZLIB: ZlibBackend = ZlibBackend;
static ZSTD: ZstdBackend = ZstdBackend;

/// Resolve the backend for a compressor code recorded in a block header.
pub fn backend_for(compressor: Compressor) -> &'static dyn Backend {
    match compressor {
        Compressor::Lz4 => &LZ4,
        Compressor::Zlib => &ZLIB,
        Compressor::Zstd => &ZSTD,
    }
}

/// Registry with every bundled filter, the framed-block filter running on `codec`.
pub fn filters_with(codec: Arc<FramedCodec>) -> FilterRegistry {
    FilterRegistry::new()
        .with(Box::new(BloscFilter::new(codec)))
        .with(Box::new(ShuffleFilter))
        .with(Box::new(DeflateFilter))
}

/// Registry with every bundled filter on a single-threaded codec.
pub fn default_filters() -> FilterRegistry {
    filters_with(Arc::new(FramedCodec::default()))
}
